//! Secured Store - 암호화 키-값 저장소 라이브러리
//!
//! 평범한 키-값 저장소 위에 투명하게 얹히는 암호화 계층입니다.
//! 키 이름은 SHA-256으로 해싱되고, 값은 OS 키체인에 묶인 마스터키로
//! XChaCha20-Poly1305 암호화되어 저장됩니다.
//!
//! ```ignore
//! use secured_store::{StoreGate, StoreSettings};
//!
//! static STORE: StoreGate = StoreGate::new();
//!
//! let options = StoreSettings::from_env()?.into_options()?;
//! let store = STORE.init(options)?;
//! store.edit().put_string("token", "abc").commit()?;
//! let token = store.get_string("token", "")?;
//! ```

pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod master_key;
pub mod migration;
pub mod recovery;
pub mod store;

pub use backend::{
    Backend, BackendEditor, BackendProvider, ChangeListener, ListenerId, MemoryBackend,
    MemoryProvider, RawValue, SqliteBackend, SqliteProvider,
};
pub use config::{StoreOptions, StoreSettings};
pub use error::{BackendError, CryptoError, KeystoreError, StoreError, StoreResult};
pub use keystore::{KeyPairHandle, MemoryKeyFacility, OsKeyFacility, SecureKeyFacility};
pub use master_key::KeyState;
pub use migration::{migrate, MigrationHandler, MigrationResult};
pub use recovery::{RecoveryContext, RecoveryHandler, RecoveryPolicy};
pub use store::{
    DroppedWrite, EditReport, Editor, Lenient, SecuredStore, Snapshot, StoreGate, StoreValue,
    CURRENT_VERSION, LEGACY_VERSION, VERSION_KEY,
};
