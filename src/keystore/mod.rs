//! Secure Key Facility 모듈
//!
//! 플랫폼 보안 키 저장소에 대한 얇은 어댑터.
//! 비대칭 키쌍(X25519)은 alias로 식별되며, 대칭 마스터키는 이 키쌍으로 래핑된다.
//!
//! - `OsKeyFacility`: OS 키체인/키링에 개인키 저장
//! - `MemoryKeyFacility`: 프로세스 내부 구현 (테스트, 장애 주입)

pub mod envelope;
pub mod memory;
pub mod os;

use zeroize::Zeroizing;

use crate::error::KeystoreError;

pub use memory::MemoryKeyFacility;
pub use os::OsKeyFacility;

/// 보안 키 저장소에 보관된 키쌍 참조 (개인키는 노출하지 않음)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPairHandle {
    alias: String,
    public_key: [u8; 32],
}

impl KeyPairHandle {
    pub fn new(alias: impl Into<String>, public_key: [u8; 32]) -> Self {
        Self {
            alias: alias.into(),
            public_key,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }
}

/// 플랫폼이 지원하는 기능
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilityCapabilities {
    /// 임의의 대칭키 재료를 래핑할 수 있는지 여부.
    /// false면 마스터키는 shifting seed + device secret에서 파생된다.
    pub symmetric_wrapping: bool,
}

impl Default for FacilityCapabilities {
    fn default() -> Self {
        Self {
            symmetric_wrapping: true,
        }
    }
}

/// 보안 키 저장소 인터페이스
pub trait SecureKeyFacility: Send + Sync {
    fn capabilities(&self) -> FacilityCapabilities;

    fn generate_key_pair(&self, alias: &str) -> Result<KeyPairHandle, KeystoreError>;

    fn get_key_pair(&self, alias: &str) -> Result<Option<KeyPairHandle>, KeystoreError>;

    fn list_aliases(&self) -> Result<Vec<String>, KeystoreError>;

    /// 없는 alias 삭제는 성공으로 취급
    fn delete_alias(&self, alias: &str) -> Result<(), KeystoreError>;

    fn wrap(&self, key_material: &[u8], handle: &KeyPairHandle) -> Result<Vec<u8>, KeystoreError>;

    fn unwrap(
        &self,
        wrapped: &[u8],
        handle: &KeyPairHandle,
    ) -> Result<Zeroizing<Vec<u8>>, KeystoreError>;

    /// 키쌍에 묶인 결정적 비밀값 (fallback 경로 전용)
    fn derive_device_secret(
        &self,
        handle: &KeyPairHandle,
        context: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, KeystoreError>;
}

/// 저장소 인스턴스 하나가 사용하는 alias 묶음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAliases {
    /// 마스터키 래핑용 (기본 경로)
    pub wrapping: String,
    /// shifting fallback 경로용
    pub shifting: String,
}

impl KeyAliases {
    pub const WRAPPING_SUFFIX: &'static str = "_sps_wrap_key";
    pub const SHIFTING_SUFFIX: &'static str = "_sps_shift_key";

    pub fn from_prefix(prefix: &str) -> Self {
        Self {
            wrapping: format!("{}{}", prefix, Self::WRAPPING_SUFFIX),
            shifting: format!("{}{}", prefix, Self::SHIFTING_SUFFIX),
        }
    }

    pub fn all(&self) -> [&str; 2] {
        [&self.wrapping, &self.shifting]
    }

    pub fn owns(&self, alias: &str) -> bool {
        alias == self.wrapping || alias == self.shifting
    }
}

/// alias가 있으면 가져오고 없으면 생성
pub fn get_or_generate(
    facility: &dyn SecureKeyFacility,
    alias: &str,
) -> Result<KeyPairHandle, KeystoreError> {
    match facility.get_key_pair(alias)? {
        Some(handle) => Ok(handle),
        None => {
            tracing::debug!(alias, "generating key pair");
            facility.generate_key_pair(alias)
        }
    }
}
