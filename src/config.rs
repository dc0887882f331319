//! Store 설정
//!
//! `StoreOptions`는 코드에서 조립하는 builder, `StoreSettings`는 `.env`/환경변수에서
//! 읽어 운영 구성(SQLite + OS keyring)으로 변환하는 설정이다.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use zeroize::Zeroizing;

use crate::backend::{BackendProvider, SqliteProvider};
use crate::error::StoreError;
use crate::keystore::{OsKeyFacility, SecureKeyFacility};
use crate::recovery::RecoveryPolicy;

pub const DEFAULT_STORE_NAME: &str = "SPS_file";
pub const DEFAULT_KEY_PREFIX: &str = "sps";
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

/// Store 생성 옵션
#[derive(Clone)]
pub struct StoreOptions {
    pub(crate) provider: Arc<dyn BackendProvider>,
    pub(crate) facility: Arc<dyn SecureKeyFacility>,
    pub(crate) store_name: String,
    pub(crate) key_prefix: String,
    pub(crate) seed: Option<Zeroizing<Vec<u8>>>,
    pub(crate) recovery: RecoveryPolicy,
    pub(crate) failure_threshold: usize,
}

impl StoreOptions {
    pub fn new(provider: Arc<dyn BackendProvider>, facility: Arc<dyn SecureKeyFacility>) -> Self {
        Self {
            provider,
            facility,
            store_name: DEFAULT_STORE_NAME.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            seed: None,
            recovery: RecoveryPolicy::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = name.into();
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// 래핑 미지원 플랫폼용 shifting seed.
    /// 실행마다 동일해야 하며, 바뀌면 기존 데이터는 복구할 수 없다.
    pub fn seed(mut self, seed: impl AsRef<[u8]>) -> Self {
        self.seed = Some(Zeroizing::new(seed.as_ref().to_vec()));
        self
    }

    pub fn recovery(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery = policy;
        self
    }

    /// 연속 암호화 실패가 몇 번 이어지면 recovery로 넘길지 (최소 1)
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn get_store_name(&self) -> &str {
        &self.store_name
    }

    pub fn get_key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("store_name", &self.store_name)
            .field("key_prefix", &self.key_prefix)
            .field("seed", &self.seed.as_ref().map(|_| "<redacted>"))
            .field("recovery", &self.recovery)
            .field("failure_threshold", &self.failure_threshold)
            .finish()
    }
}

/// 환경변수 기반 설정
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub data_dir: Option<PathBuf>,
    pub store_name: Option<String>,
    pub key_prefix: Option<String>,
    pub seed: Option<String>,
    pub keyring_service: Option<String>,
    pub failure_threshold: Option<usize>,
}

impl StoreSettings {
    /// `.env` 파일을 먼저 읽은 뒤 프로세스 환경변수에서 `SPS_*` 값을 로드
    pub fn from_env() -> Result<Self, StoreError> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("no .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let failure_threshold = match non_empty("SPS_FAILURE_THRESHOLD") {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|e| {
                StoreError::Initialization(format!("invalid SPS_FAILURE_THRESHOLD {:?}: {}", raw, e))
            })?),
            None => None,
        };

        Ok(Self {
            data_dir: non_empty("SPS_DATA_DIR").map(PathBuf::from),
            store_name: non_empty("SPS_STORE_NAME"),
            key_prefix: non_empty("SPS_KEY_PREFIX"),
            seed: non_empty("SPS_SEED"),
            keyring_service: non_empty("SPS_KEYRING_SERVICE"),
            failure_threshold,
        })
    }

    /// SQLite provider + OS keyring 구성으로 변환
    pub fn into_options(self) -> Result<StoreOptions, StoreError> {
        let data_dir = self
            .data_dir
            .ok_or_else(|| StoreError::Initialization("SPS_DATA_DIR is not set".to_string()))?;

        let facility: Arc<dyn SecureKeyFacility> = match self.keyring_service {
            Some(service) => Arc::new(OsKeyFacility::new(service)),
            None => Arc::new(OsKeyFacility::default()),
        };
        let mut options = StoreOptions::new(Arc::new(SqliteProvider::new(data_dir)), facility);

        if let Some(name) = self.store_name {
            options = options.store_name(name);
        }
        if let Some(prefix) = self.key_prefix {
            options = options.key_prefix(prefix);
        }
        if let Some(seed) = self.seed {
            options = options.seed(Zeroizing::new(seed).as_bytes());
        }
        if let Some(threshold) = self.failure_threshold {
            options = options.failure_threshold(threshold);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_settings_from_lookup() {
        let settings = StoreSettings::from_lookup(lookup(&[
            ("SPS_DATA_DIR", "/tmp/sps"),
            ("SPS_STORE_NAME", "prefs"),
            ("SPS_KEY_PREFIX", ""),
            ("SPS_FAILURE_THRESHOLD", " 5 "),
        ]))
        .unwrap();

        assert_eq!(settings.data_dir, Some(PathBuf::from("/tmp/sps")));
        assert_eq!(settings.store_name.as_deref(), Some("prefs"));
        assert_eq!(settings.key_prefix, None);
        assert_eq!(settings.failure_threshold, Some(5));

        let options = settings.into_options().unwrap();
        assert_eq!(options.get_store_name(), "prefs");
        assert_eq!(options.get_key_prefix(), DEFAULT_KEY_PREFIX);
        assert_eq!(options.failure_threshold, 5);
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let err = StoreSettings::from_lookup(lookup(&[("SPS_FAILURE_THRESHOLD", "many")]))
            .err()
            .unwrap();
        assert_eq!(err.code(), "INITIALIZATION_FAILURE");
    }

    #[test]
    fn test_missing_data_dir() {
        let err = StoreSettings::default().into_options().unwrap_err();
        assert!(err.to_string().contains("SPS_DATA_DIR"));
    }

    #[test]
    fn test_options_debug_redacts_seed() {
        let options = StoreOptions::new(
            Arc::new(crate::backend::MemoryProvider::new()),
            Arc::new(crate::keystore::MemoryKeyFacility::new()),
        )
        .seed(b"very secret seed")
        .failure_threshold(0);

        let debug = format!("{:?}", options);
        assert!(!debug.contains("very secret seed"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(options.failure_threshold, 1);
    }
}
