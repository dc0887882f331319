//! In-memory Secure Key Facility
//!
//! OS 키체인 없이 같은 암호 구성을 사용하는 구현.
//! 플랫폼이 키를 조용히 무효화하는 상황을 재현하기 위한 훅을 제공한다.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use zeroize::Zeroizing;

use super::envelope;
use super::{FacilityCapabilities, KeyPairHandle, SecureKeyFacility};
use crate::error::KeystoreError;

#[derive(Default)]
pub struct MemoryKeyFacility {
    keys: Mutex<BTreeMap<String, Zeroizing<[u8; 32]>>>,
    no_symmetric_wrapping: AtomicBool,
    generated: AtomicUsize,
    deleted: AtomicUsize,
}

impl MemoryKeyFacility {
    pub fn new() -> Self {
        Self::default()
    }

    /// 대칭키 래핑을 지원하지 않는 플랫폼 흉내
    pub fn without_symmetric_wrapping() -> Self {
        let facility = Self::default();
        facility.set_symmetric_wrapping(false);
        facility
    }

    pub fn set_symmetric_wrapping(&self, supported: bool) {
        self.no_symmetric_wrapping.store(!supported, Ordering::SeqCst);
    }

    /// 플랫폼 초기화 등으로 alias가 통째로 사라진 상황
    pub fn drop_alias_silently(&self, alias: &str) -> bool {
        self.keys.lock().remove(alias).is_some()
    }

    /// 생체 정보 변경 등으로 같은 alias의 키 재료가 바뀐 상황
    pub fn replace_key_silently(&self, alias: &str) -> bool {
        let mut keys = self.keys.lock();
        match keys.get_mut(alias) {
            Some(slot) => {
                *slot = envelope::generate_secret();
                true
            }
            None => false,
        }
    }

    pub fn generation_count(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn deletion_count(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    fn secret_for(&self, handle: &KeyPairHandle) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
        self.keys
            .lock()
            .get(handle.alias())
            .cloned()
            .ok_or_else(|| KeystoreError::AliasNotFound(handle.alias().to_string()))
    }
}

impl SecureKeyFacility for MemoryKeyFacility {
    fn capabilities(&self) -> FacilityCapabilities {
        FacilityCapabilities {
            symmetric_wrapping: !self.no_symmetric_wrapping.load(Ordering::SeqCst),
        }
    }

    fn generate_key_pair(&self, alias: &str) -> Result<KeyPairHandle, KeystoreError> {
        let secret = envelope::generate_secret();
        let public = envelope::public_key_of(&secret);
        self.keys.lock().insert(alias.to_string(), secret);
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(KeyPairHandle::new(alias, public))
    }

    fn get_key_pair(&self, alias: &str) -> Result<Option<KeyPairHandle>, KeystoreError> {
        Ok(self
            .keys
            .lock()
            .get(alias)
            .map(|secret| KeyPairHandle::new(alias, envelope::public_key_of(secret))))
    }

    fn list_aliases(&self) -> Result<Vec<String>, KeystoreError> {
        Ok(self.keys.lock().keys().cloned().collect())
    }

    fn delete_alias(&self, alias: &str) -> Result<(), KeystoreError> {
        if self.keys.lock().remove(alias).is_some() {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn wrap(&self, key_material: &[u8], handle: &KeyPairHandle) -> Result<Vec<u8>, KeystoreError> {
        if !self.capabilities().symmetric_wrapping {
            return Err(KeystoreError::Unsupported("symmetric key wrapping"));
        }
        // alias가 사라졌으면 래핑도 거부
        self.secret_for(handle)?;
        envelope::seal(handle.public_key(), key_material)
    }

    fn unwrap(
        &self,
        wrapped: &[u8],
        handle: &KeyPairHandle,
    ) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
        let secret = self.secret_for(handle)?;
        envelope::open(&secret, wrapped)
    }

    fn derive_device_secret(
        &self,
        handle: &KeyPairHandle,
        context: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
        let secret = self.secret_for(handle)?;
        envelope::derive_device_secret(&secret, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let facility = MemoryKeyFacility::new();
        let handle = facility.generate_key_pair("k").unwrap();

        let wrapped = facility.wrap(&[7u8; 32], &handle).unwrap();
        let unwrapped = facility.unwrap(&wrapped, &handle).unwrap();
        assert_eq!(unwrapped.as_slice(), &[7u8; 32]);
    }

    #[test]
    fn test_replaced_key_rejects_unwrap() {
        let facility = MemoryKeyFacility::new();
        let handle = facility.generate_key_pair("k").unwrap();
        let wrapped = facility.wrap(&[7u8; 32], &handle).unwrap();

        assert!(facility.replace_key_silently("k"));
        assert!(matches!(
            facility.unwrap(&wrapped, &handle),
            Err(KeystoreError::Rejected(_))
        ));
    }

    #[test]
    fn test_dropped_alias_is_not_found() {
        let facility = MemoryKeyFacility::new();
        let handle = facility.generate_key_pair("k").unwrap();
        let wrapped = facility.wrap(&[1u8; 32], &handle).unwrap();

        assert!(facility.drop_alias_silently("k"));
        assert!(facility.get_key_pair("k").unwrap().is_none());
        assert!(matches!(
            facility.unwrap(&wrapped, &handle),
            Err(KeystoreError::AliasNotFound(_))
        ));
        // 조용한 삭제는 삭제 횟수에 포함되지 않음
        assert_eq!(facility.deletion_count(), 0);
    }

    #[test]
    fn test_wrapping_unsupported() {
        let facility = MemoryKeyFacility::without_symmetric_wrapping();
        let handle = facility.generate_key_pair("k").unwrap();
        assert!(matches!(
            facility.wrap(&[1u8; 32], &handle),
            Err(KeystoreError::Unsupported(_))
        ));
        assert!(facility.derive_device_secret(&handle, b"ctx").is_ok());
    }
}
