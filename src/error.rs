//! Secured Store Error Types
//!
//! 계층별 에러 타입 정의 (backend / keystore / crypto / store)

use thiserror::Error;

/// 영속 저장소(backend) 에러
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// 보안 키 저장소(OS keyring 등) 에러
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Keystore unavailable: {0}")]
    Unavailable(String),

    #[error("Key alias not found: {0}")]
    AliasNotFound(String),

    #[error("Keystore rejected key material: {0}")]
    Rejected(String),

    #[error("Keystore does not support {0}")]
    Unsupported(&'static str),

    #[error("Invalid key material")]
    InvalidKeyMaterial,
}

/// 값 암복호화 에러
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Malformed ciphertext blob: {0}")]
    MalformedBlob(String),

    #[error("Authentication tag mismatch")]
    Authentication,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key invalidated: {0}")]
    KeyInvalidated(String),

    #[error("Master key is not available")]
    KeyUnavailable,
}

impl CryptoError {
    /// 저장된 키 자체가 무효화되어 발생한 에러인지 여부
    pub fn is_key_invalidated(&self) -> bool {
        matches!(self, CryptoError::KeyInvalidated(_) | CryptoError::KeyUnavailable)
    }
}

/// Secured Store 최상위 에러
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    #[error("Store is not initialized yet")]
    NotInitialized,

    #[error("Key name must not be empty")]
    InvalidKey,

    #[error("Stored value for {key} is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Recovery handler declined to recover from: {0}")]
    RecoveryDeclined(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    /// 호출자 진단용 고정 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Initialization(_) => "INITIALIZATION_FAILURE",
            StoreError::Crypto(e) if e.is_key_invalidated() => "KEY_INVALIDATED",
            StoreError::Crypto(_) => "CRYPTO_FAILURE",
            StoreError::Backend(_) => "BACKEND_FAILURE",
            StoreError::Keystore(_) => "KEYSTORE_FAILURE",
            StoreError::NotInitialized => "NOT_INITIALIZED",
            StoreError::InvalidKey => "INVALID_KEY",
            StoreError::TypeMismatch { .. } => "TYPE_MISMATCH",
            StoreError::RecoveryDeclined(_) => "RECOVERY_DECLINED",
            StoreError::Migration(_) => "MIGRATION_FAILURE",
        }
    }

    pub fn is_key_invalidated(&self) -> bool {
        matches!(self, StoreError::Crypto(e) if e.is_key_invalidated())
    }

    pub fn is_backend_failure(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

/// Store 결과 타입
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let invalidated = StoreError::from(CryptoError::KeyInvalidated("gone".into()));
        assert_eq!(invalidated.code(), "KEY_INVALIDATED");
        assert!(invalidated.is_key_invalidated());

        let auth = StoreError::from(CryptoError::Authentication);
        assert_eq!(auth.code(), "CRYPTO_FAILURE");
        assert!(!auth.is_key_invalidated());

        let backend = StoreError::from(BackendError::Unavailable("down".into()));
        assert_eq!(backend.code(), "BACKEND_FAILURE");
        assert!(backend.is_backend_failure());
    }
}
