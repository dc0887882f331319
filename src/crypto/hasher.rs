//! Key Hasher
//!
//! 평문 키 이름 → 저장소 조회용 식별자 (SHA-256, URL-safe Base64, padding 없음).
//! 출력은 `[A-Za-z0-9_-]` 43자로, 예약 식별자(`VERSION`, `__sps_*`)와 겹치지 않는다.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// 해시 식별자 길이
pub const HASHED_KEY_LEN: usize = 43;

pub fn hash_key_name(name: &str) -> Result<String, StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidKey);
    }
    let digest = Sha256::digest(name.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(digest))
}

/// 해시 식별자 형태인지 검사 (가져오기/진단용)
pub fn looks_hashed(id: &str) -> bool {
    id.len() == HASHED_KEY_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    use std::collections::HashSet;

    #[test]
    fn test_hash_is_deterministic() {
        let a = hash_key_name("username").unwrap();
        let b = hash_key_name("username").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HASHED_KEY_LEN);
        assert!(looks_hashed(&a));
        assert!(!a.contains("username"));
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert!(matches!(hash_key_name(""), Err(StoreError::InvalidKey)));
    }

    #[test]
    fn test_no_collisions_over_random_sample() {
        let mut rng = rand::thread_rng();
        let mut names = HashSet::new();
        while names.len() < 10_000 {
            let len = rng.gen_range(1..24);
            let name: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            names.insert(name);
        }

        let hashes: HashSet<String> = names
            .iter()
            .map(|n| hash_key_name(n).unwrap())
            .collect();
        assert_eq!(hashes.len(), names.len());
    }

    #[test]
    fn test_reserved_ids_are_not_hash_shaped() {
        assert!(!looks_hashed("VERSION"));
        assert!(!looks_hashed("__sps_master_key"));
    }
}
