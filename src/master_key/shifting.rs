//! Shifting fallback
//!
//! 대칭키 래핑을 지원하지 않는 플랫폼에서는 마스터키를 저장하지 않고
//! `HKDF(salt = seed, ikm = device secret)`로 매번 같은 값을 파생한다.
//! 저장되는 것은 올바른 키인지 확인하기 위한 check 태그뿐이다.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::KeystoreError;
use crate::keystore::{KeyPairHandle, SecureKeyFacility};

use super::{MasterKey, MASTER_KEY_LEN};

/// device secret 파생 context
pub const DEVICE_CONTEXT: &[u8] = b"secured-store/shifting-key/v1";

const MASTER_INFO: &[u8] = b"secured-store/master-key";
const CHECK_INFO: &[u8] = b"secured-store/master-key-check";

/// seed와 device secret으로 마스터키와 check 태그를 파생
pub fn derive(
    facility: &dyn SecureKeyFacility,
    handle: &KeyPairHandle,
    seed: &[u8],
) -> Result<(MasterKey, [u8; 32]), KeystoreError> {
    let device_secret = facility.derive_device_secret(handle, DEVICE_CONTEXT)?;
    let hkdf = Hkdf::<Sha256>::new(Some(seed), device_secret.as_slice());

    let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    hkdf.expand(MASTER_INFO, &mut key[..])
        .map_err(|e| KeystoreError::Unavailable(format!("HKDF expansion failed: {}", e)))?;

    let mut check = [0u8; 32];
    hkdf.expand(CHECK_INFO, &mut check)
        .map_err(|e| KeystoreError::Unavailable(format!("HKDF expansion failed: {}", e)))?;

    Ok((MasterKey::from_bytes(*key), check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyFacility;

    #[test]
    fn test_same_seed_same_key() {
        let facility = MemoryKeyFacility::without_symmetric_wrapping();
        let handle = facility.generate_key_pair("shift").unwrap();

        let (a, check_a) = derive(&facility, &handle, b"seed").unwrap();
        let (b, check_b) = derive(&facility, &handle, b"seed").unwrap();
        assert_eq!(a.bytes(), b.bytes());
        assert_eq!(check_a, check_b);
        assert_ne!(a.bytes(), &check_a);
    }

    #[test]
    fn test_different_seed_different_key() {
        let facility = MemoryKeyFacility::without_symmetric_wrapping();
        let handle = facility.generate_key_pair("shift").unwrap();

        let (_, check_a) = derive(&facility, &handle, b"seed").unwrap();
        let (_, check_b) = derive(&facility, &handle, b"other seed").unwrap();
        assert_ne!(check_a, check_b);
    }
}
