//! Master Key Manager - 마스터키 수명주기 관리
//!
//! 상태: `Uninitialized → Provisioned → Unwrapped → Invalidated`
//!
//! - 최초 실행: 마스터키 생성 후 보안 키 저장소 키쌍으로 래핑하여 예약 슬롯에 저장
//!   (래핑 미지원 플랫폼은 shifting seed로 파생하고 check 태그만 저장)
//! - 이후 실행: 예약 슬롯의 artifact를 풀어 메모리에 1회 로드
//! - 풀기 실패(alias 없음, 거부, 포맷 불일치)는 `Invalidated`로 전이하고 `KeyInvalidated` 반환
//!
//! 슬롯 포맷: `wrapped]<base64>` 또는 `shifted]<base64 check>`

pub mod shifting;

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use rand::Rng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::backend::{Backend, RawValue};
use crate::error::{CryptoError, KeystoreError, StoreError};
use crate::keystore::{self, KeyAliases, SecureKeyFacility};

/// 마스터키 길이 (256-bit)
pub const MASTER_KEY_LEN: usize = 32;

/// 래핑된 마스터키 artifact가 저장되는 예약 식별자
pub const MASTER_KEY_SLOT: &str = "__sps_master_key";

/// Zeroize가 적용된 마스터키 래퍼
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; MASTER_KEY_LEN],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// 마스터키 생성 (CSPRNG)
    pub fn generate() -> Self {
        let mut bytes = [0u8; MASTER_KEY_LEN];
        rand::thread_rng().fill(&mut bytes);
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.bytes
    }

    fn matches(&self, other: &MasterKey) -> bool {
        bool::from(self.bytes[..].ct_eq(&other.bytes[..]))
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// 마스터키 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Uninitialized,
    Provisioned,
    Unwrapped,
    Invalidated,
}

/// 예약 슬롯에 저장되는 artifact
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyArtifact {
    Wrapped(Vec<u8>),
    Shifted([u8; 32]),
}

impl KeyArtifact {
    const WRAPPED_TAG: &'static str = "wrapped";
    const SHIFTED_TAG: &'static str = "shifted";

    fn encode(&self) -> String {
        match self {
            KeyArtifact::Wrapped(bytes) => format!("{}]{}", Self::WRAPPED_TAG, BASE64.encode(bytes)),
            KeyArtifact::Shifted(check) => format!("{}]{}", Self::SHIFTED_TAG, BASE64.encode(check)),
        }
    }

    fn parse(raw: &RawValue) -> Result<Self, CryptoError> {
        let text = raw
            .as_text()
            .ok_or_else(|| CryptoError::KeyInvalidated("key slot is not text".to_string()))?;
        let (tag, body) = text
            .split_once(']')
            .ok_or_else(|| CryptoError::KeyInvalidated("key slot has no format tag".to_string()))?;
        let bytes = BASE64
            .decode(body)
            .map_err(|e| CryptoError::KeyInvalidated(format!("key slot encoding: {}", e)))?;

        match tag {
            Self::WRAPPED_TAG => Ok(KeyArtifact::Wrapped(bytes)),
            Self::SHIFTED_TAG => {
                let check: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    CryptoError::KeyInvalidated("shifting check has wrong length".to_string())
                })?;
                Ok(KeyArtifact::Shifted(check))
            }
            other => Err(CryptoError::KeyInvalidated(format!(
                "unknown key slot tag {:?}",
                other
            ))),
        }
    }
}

/// 보안 키 저장소 에러 분류.
/// 플랫폼 자체를 쓸 수 없는 경우만 그대로 전파하고 나머지는 키 무효화로 본다.
fn classify(err: KeystoreError) -> StoreError {
    match err {
        KeystoreError::Unavailable(_) => StoreError::Keystore(err),
        other => StoreError::Crypto(CryptoError::KeyInvalidated(other.to_string())),
    }
}

struct Slot {
    state: KeyState,
    key: Option<MasterKey>,
}

/// 마스터키 관리자
pub struct MasterKeyManager {
    facility: Arc<dyn SecureKeyFacility>,
    backend: Arc<dyn Backend>,
    aliases: KeyAliases,
    seed: Zeroizing<Vec<u8>>,
    slot: RwLock<Slot>,
}

impl MasterKeyManager {
    pub fn new(
        facility: Arc<dyn SecureKeyFacility>,
        backend: Arc<dyn Backend>,
        aliases: KeyAliases,
        seed: Option<&[u8]>,
    ) -> Self {
        Self {
            facility,
            backend,
            aliases,
            seed: Zeroizing::new(seed.map(<[u8]>::to_vec).unwrap_or_default()),
            slot: RwLock::new(Slot {
                state: KeyState::Uninitialized,
                key: None,
            }),
        }
    }

    pub fn state(&self) -> KeyState {
        self.slot.read().state
    }

    pub fn aliases(&self) -> &KeyAliases {
        &self.aliases
    }

    pub fn facility(&self) -> &dyn SecureKeyFacility {
        self.facility.as_ref()
    }

    /// 마스터키 로드 (없으면 생성)
    ///
    /// 실패 시 상태는 `Invalidated`가 되고, 호출자는 recovery 여부를 결정한다.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.write();
        if slot.state == KeyState::Unwrapped && slot.key.is_some() {
            return Ok(());
        }

        let Some(raw) = self.backend.get(MASTER_KEY_SLOT)? else {
            tracing::info!(store = self.backend.name(), "no master key found, provisioning");
            return self.provision_locked(&mut *slot);
        };

        let opened = KeyArtifact::parse(&raw)
            .map_err(StoreError::from)
            .and_then(|artifact| Ok((self.open_artifact(&artifact)?, artifact)));

        match opened {
            Ok((key, artifact)) => {
                if matches!(artifact, KeyArtifact::Shifted(_))
                    && self.facility.capabilities().symmetric_wrapping
                {
                    if let Err(e) = self.rotate_to_wrapping(&key) {
                        tracing::warn!(error = %e, "rotation to wrapped master key failed");
                    }
                }
                slot.key = Some(key);
                slot.state = KeyState::Unwrapped;
                tracing::debug!(store = self.backend.name(), "master key unwrapped");
                Ok(())
            }
            Err(e) => {
                slot.key = None;
                slot.state = KeyState::Invalidated;
                tracing::warn!(store = self.backend.name(), error = %e, "master key invalidated");
                Err(e)
            }
        }
    }

    /// 현재 메모리의 마스터키로 작업 수행
    pub fn with_key<R>(
        &self,
        f: impl FnOnce(&MasterKey) -> Result<R, CryptoError>,
    ) -> Result<R, CryptoError> {
        let slot = self.slot.read();
        match (slot.state, slot.key.as_ref()) {
            (KeyState::Unwrapped, Some(key)) => f(key),
            _ => Err(CryptoError::KeyUnavailable),
        }
    }

    /// 이 인스턴스가 소유한 alias 중 실제로 저장된 것
    pub fn stored_aliases(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .facility
            .list_aliases()?
            .into_iter()
            .filter(|alias| self.aliases.owns(alias))
            .collect())
    }

    /// Recovery 임계 구역.
    ///
    /// 쓰기 잠금을 잡은 채로 `handler`(alias/artifact 삭제)를 실행하고,
    /// 성공하면 최초 실행 경로로 다시 provisioning 한다. 동시에 실행 중인 작업은
    /// 이전 키 또는 새 키만 관찰한다. 거절되면 이전 키를 되돌려 놓는다.
    pub(crate) fn recover_with<F>(&self, handler: F) -> Result<bool, StoreError>
    where
        F: FnOnce() -> Result<bool, StoreError>,
    {
        let mut slot = self.slot.write();
        let previous_key = slot.key.take();
        let previous_state = slot.state;
        slot.state = KeyState::Invalidated;

        let restore = |slot: &mut Slot, key: Option<MasterKey>| {
            slot.state = if key.is_some() {
                previous_state
            } else {
                KeyState::Invalidated
            };
            slot.key = key;
        };

        match handler() {
            Ok(true) => {
                drop(previous_key);
                slot.state = KeyState::Uninitialized;
                self.provision_locked(&mut *slot)?;
                Ok(true)
            }
            Ok(false) => {
                restore(&mut *slot, previous_key);
                Ok(false)
            }
            Err(e) => {
                restore(&mut *slot, previous_key);
                Err(e)
            }
        }
    }

    fn provision_locked(&self, slot: &mut Slot) -> Result<(), StoreError> {
        slot.key = None;
        let facility = self.facility.as_ref();

        let (key, artifact) = if facility.capabilities().symmetric_wrapping {
            let handle = keystore::get_or_generate(facility, &self.aliases.wrapping)?;
            let key = MasterKey::generate();
            let wrapped = facility.wrap(key.bytes(), &handle)?;
            (key, KeyArtifact::Wrapped(wrapped))
        } else {
            if self.seed.is_empty() {
                tracing::warn!(
                    store = self.backend.name(),
                    "symmetric wrapping unavailable and no shifting seed supplied"
                );
            }
            let handle = keystore::get_or_generate(facility, &self.aliases.shifting)?;
            let (key, check) = shifting::derive(facility, &handle, &self.seed)?;
            (key, KeyArtifact::Shifted(check))
        };

        self.store_artifact(&artifact)?;
        slot.state = KeyState::Provisioned;
        tracing::info!(store = self.backend.name(), "master key provisioned");

        // 저장한 artifact로 다시 풀어서 검증
        let restored = self.open_artifact(&artifact)?;
        if !restored.matches(&key) {
            slot.state = KeyState::Invalidated;
            return Err(StoreError::Initialization(
                "provisioned master key failed round trip".to_string(),
            ));
        }

        slot.key = Some(key);
        slot.state = KeyState::Unwrapped;
        Ok(())
    }

    fn open_artifact(&self, artifact: &KeyArtifact) -> Result<MasterKey, StoreError> {
        let facility = self.facility.as_ref();
        match artifact {
            KeyArtifact::Wrapped(wrapped) => {
                let handle = facility
                    .get_key_pair(&self.aliases.wrapping)
                    .map_err(classify)?
                    .ok_or_else(|| {
                        CryptoError::KeyInvalidated(format!(
                            "key alias {} missing",
                            self.aliases.wrapping
                        ))
                    })?;
                let material = facility.unwrap(wrapped, &handle).map_err(classify)?;
                let bytes: [u8; MASTER_KEY_LEN] =
                    material.as_slice().try_into().map_err(|_| {
                        CryptoError::KeyInvalidated("unwrapped key has wrong length".to_string())
                    })?;
                Ok(MasterKey::from_bytes(bytes))
            }
            KeyArtifact::Shifted(expected) => {
                let handle = facility
                    .get_key_pair(&self.aliases.shifting)
                    .map_err(classify)?
                    .ok_or_else(|| {
                        CryptoError::KeyInvalidated(format!(
                            "key alias {} missing",
                            self.aliases.shifting
                        ))
                    })?;
                let (key, check) =
                    shifting::derive(facility, &handle, &self.seed).map_err(classify)?;
                if !bool::from(check[..].ct_eq(&expected[..])) {
                    return Err(CryptoError::KeyInvalidated(
                        "shifting key check mismatch".to_string(),
                    )
                    .into());
                }
                Ok(key)
            }
        }
    }

    fn store_artifact(&self, artifact: &KeyArtifact) -> Result<(), StoreError> {
        let mut editor = self.backend.edit();
        editor.put(MASTER_KEY_SLOT, RawValue::Text(artifact.encode()));
        editor.commit()?;
        Ok(())
    }

    /// 래핑을 지원하게 된 플랫폼에서 shifting 키를 래핑 키로 교체
    fn rotate_to_wrapping(&self, key: &MasterKey) -> Result<(), StoreError> {
        let facility = self.facility.as_ref();
        let handle = keystore::get_or_generate(facility, &self.aliases.wrapping)?;
        let wrapped = facility.wrap(key.bytes(), &handle)?;
        self.store_artifact(&KeyArtifact::Wrapped(wrapped))?;
        facility.delete_alias(&self.aliases.shifting)?;
        tracing::info!(
            store = self.backend.name(),
            "master key rotated from shifting to wrapped storage"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::keystore::MemoryKeyFacility;

    fn manager(
        facility: &Arc<MemoryKeyFacility>,
        backend: &MemoryBackend,
        seed: Option<&[u8]>,
    ) -> MasterKeyManager {
        MasterKeyManager::new(
            facility.clone(),
            Arc::new(backend.clone()),
            KeyAliases::from_prefix("t"),
            seed,
        )
    }

    fn key_bytes(manager: &MasterKeyManager) -> [u8; 32] {
        manager.with_key(|k| Ok(*k.bytes())).unwrap()
    }

    #[test]
    fn test_first_run_provisions_wrapped_key() {
        let facility = Arc::new(MemoryKeyFacility::new());
        let backend = MemoryBackend::new("t");
        let manager = manager(&facility, &backend, None);
        assert_eq!(manager.state(), KeyState::Uninitialized);

        manager.initialize().unwrap();
        assert_eq!(manager.state(), KeyState::Unwrapped);

        let raw = backend.get(MASTER_KEY_SLOT).unwrap().unwrap();
        assert!(raw.as_text().unwrap().starts_with("wrapped]"));
        assert_eq!(manager.stored_aliases().unwrap(), vec!["t_sps_wrap_key"]);
    }

    #[test]
    fn test_second_run_unwraps_same_key() {
        let facility = Arc::new(MemoryKeyFacility::new());
        let backend = MemoryBackend::new("t");

        let first = manager(&facility, &backend, None);
        first.initialize().unwrap();
        let second = manager(&facility, &backend, None);
        second.initialize().unwrap();

        assert_eq!(key_bytes(&first), key_bytes(&second));
        assert_eq!(facility.generation_count(), 1);
    }

    #[test]
    fn test_missing_alias_invalidates() {
        let facility = Arc::new(MemoryKeyFacility::new());
        let backend = MemoryBackend::new("t");
        manager(&facility, &backend, None).initialize().unwrap();

        facility.drop_alias_silently("t_sps_wrap_key");
        let reopened = manager(&facility, &backend, None);
        let err = reopened.initialize().unwrap_err();
        assert!(err.is_key_invalidated());
        assert_eq!(reopened.state(), KeyState::Invalidated);
        assert!(matches!(
            reopened.with_key(|_| Ok(())),
            Err(CryptoError::KeyUnavailable)
        ));
    }

    #[test]
    fn test_corrupt_slot_invalidates() {
        let facility = Arc::new(MemoryKeyFacility::new());
        let backend = MemoryBackend::new("t");
        backend.overwrite_raw(MASTER_KEY_SLOT, RawValue::Text("garbage".into()));

        let manager = manager(&facility, &backend, None);
        assert!(manager.initialize().unwrap_err().is_key_invalidated());
    }

    #[test]
    fn test_shifting_fallback_is_deterministic() {
        let facility = Arc::new(MemoryKeyFacility::without_symmetric_wrapping());
        let backend = MemoryBackend::new("t");

        let first = manager(&facility, &backend, Some(b"seed"));
        first.initialize().unwrap();
        let raw = backend.get(MASTER_KEY_SLOT).unwrap().unwrap();
        assert!(raw.as_text().unwrap().starts_with("shifted]"));

        let second = manager(&facility, &backend, Some(b"seed"));
        second.initialize().unwrap();
        assert_eq!(key_bytes(&first), key_bytes(&second));

        let wrong_seed = manager(&facility, &backend, Some(b"other"));
        assert!(wrong_seed.initialize().unwrap_err().is_key_invalidated());
    }

    #[test]
    fn test_shifted_key_rotates_once_wrapping_available() {
        let facility = Arc::new(MemoryKeyFacility::without_symmetric_wrapping());
        let backend = MemoryBackend::new("t");
        let first = manager(&facility, &backend, Some(b"seed"));
        first.initialize().unwrap();

        facility.set_symmetric_wrapping(true);
        let upgraded = manager(&facility, &backend, Some(b"seed"));
        upgraded.initialize().unwrap();
        assert_eq!(key_bytes(&first), key_bytes(&upgraded));

        let raw = backend.get(MASTER_KEY_SLOT).unwrap().unwrap();
        assert!(raw.as_text().unwrap().starts_with("wrapped]"));
        assert_eq!(upgraded.stored_aliases().unwrap(), vec!["t_sps_wrap_key"]);

        // 이후 실행은 래핑 경로만 사용
        let third = manager(&facility, &backend, None);
        third.initialize().unwrap();
        assert_eq!(key_bytes(&first), key_bytes(&third));
    }

    #[test]
    fn test_recover_with_declined_keeps_previous_key() {
        let facility = Arc::new(MemoryKeyFacility::new());
        let backend = MemoryBackend::new("t");
        let manager = manager(&facility, &backend, None);
        manager.initialize().unwrap();
        let before = key_bytes(&manager);

        assert!(!manager.recover_with(|| Ok(false)).unwrap());
        assert_eq!(manager.state(), KeyState::Unwrapped);
        assert_eq!(key_bytes(&manager), before);

        assert!(manager.recover_with(|| Ok(true)).unwrap());
        assert_eq!(manager.state(), KeyState::Unwrapped);
        assert_ne!(key_bytes(&manager), before);
    }

    #[test]
    fn test_master_key_debug_is_redacted() {
        let key = MasterKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{:?}", key), "MasterKey(<redacted>)");
    }
}
