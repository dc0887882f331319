//! OS 키체인/키링 기반 Secure Key Facility
//!
//! - alias마다 Keychain 엔트리 1개 (X25519 개인키, Base64)
//! - alias 목록은 별도 인덱스 엔트리(`__sps_alias_index`)에 JSON으로 보관
//!   (keyring은 엔트리 열거를 지원하지 않음)

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyring::{Entry, Error as KeyringError};
use parking_lot::Mutex;
use zeroize::Zeroizing;

use super::envelope;
use super::{FacilityCapabilities, KeyPairHandle, SecureKeyFacility};
use crate::error::KeystoreError;

/// 기본 Keychain 서비스 이름
pub const DEFAULT_SERVICE: &str = "online.devliving.secured-store";

const ALIAS_INDEX_KEY: &str = "__sps_alias_index";

fn map_keyring_error(err: KeyringError) -> KeystoreError {
    KeystoreError::Unavailable(format!("Keychain error: {}", err))
}

pub struct OsKeyFacility {
    service: String,
    // 인덱스 read-modify-write 직렬화
    index_lock: Mutex<()>,
}

impl OsKeyFacility {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn entry(&self, alias: &str) -> Result<Entry, KeystoreError> {
        Entry::new(&self.service, alias).map_err(map_keyring_error)
    }

    fn load_secret(&self, alias: &str) -> Result<Option<Zeroizing<[u8; 32]>>, KeystoreError> {
        let encoded = match self.entry(alias)?.get_password() {
            Ok(value) => Zeroizing::new(value),
            Err(KeyringError::NoEntry) => return Ok(None),
            Err(e) => return Err(map_keyring_error(e)),
        };

        let bytes = Zeroizing::new(
            BASE64
                .decode(encoded.as_bytes())
                .map_err(|_| KeystoreError::InvalidKeyMaterial)?,
        );
        if bytes.len() != 32 {
            return Err(KeystoreError::InvalidKeyMaterial);
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        secret.copy_from_slice(&bytes);
        Ok(Some(secret))
    }

    fn require_secret(&self, handle: &KeyPairHandle) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
        self.load_secret(handle.alias())?
            .ok_or_else(|| KeystoreError::AliasNotFound(handle.alias().to_string()))
    }

    fn read_index(&self) -> Result<Vec<String>, KeystoreError> {
        match self.entry(ALIAS_INDEX_KEY)?.get_password() {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| KeystoreError::Unavailable(format!("corrupt alias index: {}", e))),
            Err(KeyringError::NoEntry) => Ok(Vec::new()),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn write_index(&self, aliases: &[String]) -> Result<(), KeystoreError> {
        let entry = self.entry(ALIAS_INDEX_KEY)?;
        if aliases.is_empty() {
            return match entry.delete_password() {
                Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
                Err(e) => Err(map_keyring_error(e)),
            };
        }
        let json = serde_json::to_string(aliases)
            .map_err(|e| KeystoreError::Unavailable(e.to_string()))?;
        entry.set_password(&json).map_err(map_keyring_error)
    }
}

impl Default for OsKeyFacility {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

impl SecureKeyFacility for OsKeyFacility {
    fn capabilities(&self) -> FacilityCapabilities {
        FacilityCapabilities::default()
    }

    fn generate_key_pair(&self, alias: &str) -> Result<KeyPairHandle, KeystoreError> {
        let secret = envelope::generate_secret();
        let public = envelope::public_key_of(&secret);

        let encoded = Zeroizing::new(BASE64.encode(secret.as_slice()));
        self.entry(alias)?
            .set_password(&encoded)
            .map_err(map_keyring_error)?;

        let _guard = self.index_lock.lock();
        let mut aliases = self.read_index()?;
        if !aliases.iter().any(|a| a == alias) {
            aliases.push(alias.to_string());
            self.write_index(&aliases)?;
        }

        tracing::info!(alias, "key pair stored in keychain");
        Ok(KeyPairHandle::new(alias, public))
    }

    fn get_key_pair(&self, alias: &str) -> Result<Option<KeyPairHandle>, KeystoreError> {
        Ok(self
            .load_secret(alias)?
            .map(|secret| KeyPairHandle::new(alias, envelope::public_key_of(&secret))))
    }

    fn list_aliases(&self) -> Result<Vec<String>, KeystoreError> {
        let _guard = self.index_lock.lock();
        self.read_index()
    }

    fn delete_alias(&self, alias: &str) -> Result<(), KeystoreError> {
        match self.entry(alias)?.delete_password() {
            Ok(()) | Err(KeyringError::NoEntry) => {}
            Err(e) => return Err(map_keyring_error(e)),
        }

        let _guard = self.index_lock.lock();
        let mut aliases = self.read_index()?;
        let before = aliases.len();
        aliases.retain(|a| a != alias);
        if aliases.len() != before {
            self.write_index(&aliases)?;
        }
        tracing::info!(alias, "key pair deleted from keychain");
        Ok(())
    }

    fn wrap(&self, key_material: &[u8], handle: &KeyPairHandle) -> Result<Vec<u8>, KeystoreError> {
        envelope::seal(handle.public_key(), key_material)
    }

    fn unwrap(
        &self,
        wrapped: &[u8],
        handle: &KeyPairHandle,
    ) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
        let secret = self.require_secret(handle)?;
        envelope::open(&secret, wrapped)
    }

    fn derive_device_secret(
        &self,
        handle: &KeyPairHandle,
        context: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
        let secret = self.require_secret(handle)?;
        envelope::derive_device_secret(&secret, context)
    }
}
