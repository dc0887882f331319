//! Versioned Store Facade
//!
//! 타입별 get/put을 Key Hasher + Value Cipher로 연결하는 공개 API.
//!
//! - 정수/실수/불리언은 문자열 표현으로 바꾼 뒤 같은 경로로 암호화
//! - 단일 키 읽기의 조회 실패/복호화 실패는 기본값 반환 (`Lenient`에 에러 보존)
//! - 저장소(backend) 에러는 절대 삼키지 않음
//! - 버전 마커가 없으면: 빈 저장소는 현재 버전, 데이터가 있으면 레거시 버전 기록

mod editor;
mod gate;
mod outcome;


use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::backend::{Backend, ChangeListener, ListenerId, RawValue};
use crate::config::StoreOptions;
use crate::crypto::{decrypt_value, encrypt_value, hash_key_name, is_cipher_blob};
use crate::error::{CryptoError, StoreError, StoreResult};
use crate::keystore::KeyAliases;
use crate::master_key::{KeyState, MasterKeyManager, MASTER_KEY_SLOT};
use crate::migration::MigrationResult;
use crate::recovery::{RecoveryCoordinator, RecoveryPolicy};

pub use editor::Editor;
pub use gate::StoreGate;
pub use outcome::{DroppedWrite, EditReport, Lenient, Snapshot, StoreValue};

/// 버전 마커 식별자 (해싱/암호화하지 않음)
pub const VERSION_KEY: &str = "VERSION";

/// 현재 스키마 버전
pub const CURRENT_VERSION: i64 = 600;

/// 버전 추적 이전에 만들어진 저장소
pub const LEGACY_VERSION: i64 = 500;

/// 사용자 엔트리가 아닌 예약 식별자
pub(crate) fn is_reserved(id: &str) -> bool {
    id == VERSION_KEY || id == MASTER_KEY_SLOT
}

/// 암호화 키-값 저장소
pub struct SecuredStore {
    name: String,
    backend: Arc<dyn Backend>,
    keys: MasterKeyManager,
    recovery: RecoveryCoordinator,
    failure_threshold: usize,
    consecutive_failures: AtomicUsize,
    schema_version: AtomicI64,
}

impl SecuredStore {
    /// 저장소를 열고 마스터키를 준비한다.
    ///
    /// 키가 무효화되어 있으면 같은 스레드에서 recovery를 실행하고,
    /// recovery가 실패한 경우에만 `Initialization` 에러를 반환한다.
    pub fn open(options: StoreOptions) -> StoreResult<Self> {
        tracing::info!(store = %options.store_name, "opening secured store");

        let backend = options.provider.open(&options.store_name)?;
        let keys = MasterKeyManager::new(
            options.facility.clone(),
            backend.clone(),
            KeyAliases::from_prefix(&options.key_prefix),
            options.seed.as_ref().map(|seed| seed.as_slice()),
        );

        let store = Self {
            name: options.store_name,
            backend,
            keys,
            recovery: RecoveryCoordinator::new(options.recovery),
            failure_threshold: options.failure_threshold.max(1),
            consecutive_failures: AtomicUsize::new(0),
            schema_version: AtomicI64::new(0),
        };

        store.initialize_keys()?;
        let version = store.stamp_version()?;
        tracing::info!(store = %store.name, version, "secured store ready");
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 원시 저장소 (해시 식별자 + 암호문)
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn schema_version(&self) -> i64 {
        self.schema_version.load(Ordering::SeqCst)
    }

    pub fn key_state(&self) -> KeyState {
        self.keys.state()
    }

    pub fn set_recovery_policy(&self, policy: RecoveryPolicy) {
        self.recovery.set_policy(policy);
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        self.recovery.policy()
    }

    /// 지금까지 성공한 recovery 횟수
    pub fn recovery_count(&self) -> usize {
        self.recovery.recovery_count()
    }

    // ============================================
    // 초기화
    // ============================================

    fn initialize_keys(&self) -> StoreResult<()> {
        let err = match self.keys.initialize() {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if !err.is_key_invalidated() {
            return Err(match err {
                StoreError::Backend(_) => err,
                other => StoreError::Initialization(other.to_string()),
            });
        }

        self.recovery
            .recover(&err, &self.keys, self.backend.as_ref())
            .map_err(|recovery_err| {
                tracing::error!(
                    store = %self.name,
                    error = %err,
                    recovery_error = %recovery_err,
                    "master key recovery failed during initialization"
                );
                StoreError::Initialization(format!("{} (recovery failed: {})", err, recovery_err))
            })
    }

    /// 버전 마커 확인, 없으면 기록
    fn stamp_version(&self) -> StoreResult<i64> {
        if let Some(version) = self.backend.get(VERSION_KEY)?.and_then(|v| v.as_int()) {
            self.schema_version.store(version, Ordering::SeqCst);
            return Ok(version);
        }

        let has_entries = self.backend.get_all()?.keys().any(|id| !is_reserved(id));
        let version = if has_entries {
            LEGACY_VERSION
        } else {
            CURRENT_VERSION
        };

        let mut editor = self.backend.edit();
        editor.put(VERSION_KEY, RawValue::Int(version));
        editor.commit()?;

        self.schema_version.store(version, Ordering::SeqCst);
        tracing::info!(store = %self.name, version, legacy = has_entries, "schema version stamped");
        Ok(version)
    }

    // ============================================
    // 암호화 경로
    // ============================================

    /// 암호화 실패 카운트 + recovery 승격
    ///
    /// 키 무효화 에러이거나 연속 실패가 임계값에 도달하면 recovery를 실행하고
    /// 성공 시 작업을 한 번 재시도한다.
    fn guarded<T>(&self, op: impl Fn() -> StoreResult<T>) -> StoreResult<T> {
        let epoch = self.recovery.recovery_count();
        let err = match op() {
            Ok(value) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                return Ok(value);
            }
            Err(e) => e,
        };

        if !matches!(err, StoreError::Crypto(_)) {
            return Err(err);
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if !err.is_key_invalidated() && failures < self.failure_threshold {
            return Err(err);
        }

        self.consecutive_failures.store(0, Ordering::SeqCst);
        tracing::warn!(
            store = %self.name,
            failures,
            error = %err,
            "escalating crypto failure to recovery"
        );
        self.recovery
            .recover_after(epoch, &err, &self.keys, self.backend.as_ref())?;
        self.stamp_version()?;
        op()
    }

    pub(crate) fn encrypt(&self, plaintext: &[u8]) -> StoreResult<String> {
        self.guarded(|| Ok(self.keys.with_key(|key| encrypt_value(key, plaintext))?))
    }

    fn decrypt_text(&self, blob: &str) -> StoreResult<String> {
        let bytes = self.keys.with_key(|key| decrypt_value(key, blob))?;
        String::from_utf8(bytes).map_err(|e| {
            StoreError::from(CryptoError::MalformedBlob(format!(
                "decrypted value is not UTF-8: {}",
                e
            )))
        })
    }

    /// 키 해싱 + 값 암호화
    pub(crate) fn seal_text(&self, key: &str, value: &str) -> StoreResult<(String, String)> {
        let id = hash_key_name(key)?;
        let blob = self.encrypt(value.as_bytes())?;
        Ok((id, blob))
    }

    // ============================================
    // 읽기
    // ============================================

    fn read<T>(
        &self,
        key: &str,
        default: T,
        decode: impl Fn(RawValue) -> StoreResult<T>,
    ) -> StoreResult<Lenient<T>> {
        let id = match hash_key_name(key) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(store = %self.name, error = %e, "read with invalid key name");
                return Ok(Lenient::degraded(default, e));
            }
        };

        let outcome = self.guarded(|| match self.backend.get(&id)? {
            Some(raw) => decode(raw).map(Some),
            None => Ok(None),
        });

        match outcome {
            Ok(Some(value)) => Ok(Lenient::clean(value)),
            Ok(None) => Ok(Lenient::clean(default)),
            Err(e) if e.is_backend_failure() => Err(e),
            Err(e) => {
                tracing::warn!(
                    store = %self.name,
                    code = e.code(),
                    error = %e,
                    "read failed, returning default"
                );
                Ok(Lenient::degraded(default, e))
            }
        }
    }

    fn decode_text(&self, key: &str, raw: RawValue) -> StoreResult<String> {
        match raw {
            RawValue::Text(blob) => self.decrypt_text(&blob),
            _ => Err(StoreError::TypeMismatch {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    fn decode_parsed<T: FromStr>(
        &self,
        key: &str,
        raw: RawValue,
        expected: &'static str,
    ) -> StoreResult<T> {
        let text = self.decode_text(key, raw)?;
        text.trim().parse().map_err(|_| StoreError::TypeMismatch {
            key: key.to_string(),
            expected,
        })
    }

    pub fn get_string(&self, key: &str, default: &str) -> StoreResult<Lenient<String>> {
        self.read(key, default.to_string(), |raw| self.decode_text(key, raw))
    }

    /// 기본값 없이 읽기 (없거나 복호화 실패 시 `None`)
    pub fn get_string_opt(&self, key: &str) -> StoreResult<Lenient<Option<String>>> {
        self.read(key, None, |raw| self.decode_text(key, raw).map(Some))
    }

    pub fn get_int(&self, key: &str, default: i32) -> StoreResult<Lenient<i32>> {
        self.read(key, default, |raw| self.decode_parsed(key, raw, "int"))
    }

    pub fn get_long(&self, key: &str, default: i64) -> StoreResult<Lenient<i64>> {
        self.read(key, default, |raw| self.decode_parsed(key, raw, "long"))
    }

    pub fn get_float(&self, key: &str, default: f32) -> StoreResult<Lenient<f32>> {
        self.read(key, default, |raw| self.decode_parsed(key, raw, "float"))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> StoreResult<Lenient<bool>> {
        self.read(key, default, |raw| self.decode_parsed(key, raw, "bool"))
    }

    pub fn get_bytes(&self, key: &str) -> StoreResult<Lenient<Option<Vec<u8>>>> {
        self.read(key, None, |raw| {
            let encoded = self.decode_text(key, raw)?;
            BASE64
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(|_| StoreError::TypeMismatch {
                    key: key.to_string(),
                    expected: "bytes",
                })
        })
    }

    /// 문자열 집합 읽기. 멤버 하나라도 복호화에 실패하면 기본값.
    pub fn get_string_set(
        &self,
        key: &str,
        default: BTreeSet<String>,
    ) -> StoreResult<Lenient<BTreeSet<String>>> {
        self.read(key, default, |raw| match raw {
            RawValue::TextSet(members) => members
                .iter()
                .map(|member| self.decrypt_text(member))
                .collect::<StoreResult<BTreeSet<String>>>(),
            _ => Err(StoreError::TypeMismatch {
                key: key.to_string(),
                expected: "string set",
            }),
        })
    }

    pub fn contains(&self, key: &str) -> StoreResult<bool> {
        let id = hash_key_name(key)?;
        Ok(self.backend.contains(&id)?)
    }

    /// 예약 엔트리를 제외한 전체 엔트리 복호화.
    /// 복호화에 실패한 엔트리는 건너뛰고 `skipped`에 식별자를 남긴다.
    pub fn get_all(&self) -> StoreResult<Snapshot> {
        let mut snapshot = Snapshot::default();

        for (id, raw) in self.backend.get_all()? {
            if is_reserved(&id) {
                continue;
            }

            let value = match raw {
                RawValue::Int(v) => Ok(StoreValue::Int(v)),
                RawValue::Text(text) if is_cipher_blob(&text) => {
                    self.decrypt_text(&text).map(StoreValue::Text)
                }
                RawValue::Text(text) => Ok(StoreValue::Text(text)),
                RawValue::TextSet(members) => members
                    .iter()
                    .map(|member| self.decrypt_text(member))
                    .collect::<StoreResult<BTreeSet<_>>>()
                    .map(StoreValue::TextSet),
            };

            match value {
                Ok(value) => {
                    snapshot.entries.insert(id, value);
                }
                Err(e) => {
                    tracing::warn!(store = %self.name, id = %id, error = %e, "skipping undecryptable entry");
                    snapshot.skipped.push(id);
                }
            }
        }

        snapshot.skipped.sort();
        Ok(snapshot)
    }

    // ============================================
    // 쓰기 / 리스너
    // ============================================

    pub fn edit(&self) -> Editor<'_> {
        Editor::new(self)
    }

    /// 커밋된 변경마다 해시 식별자로 통지된다.
    ///
    /// recovery 중 커밋에서도 호출되므로, 리스너 안에서 이 저장소를 다시
    /// 읽으면 안 된다 (recovery가 키 잠금을 잡고 있음).
    pub fn register_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.backend.register_listener(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.backend.unregister_listener(id)
    }

    /// 평문 저장소의 엔트리를 모두 암호화하여 가져온다.
    ///
    /// 원본은 수정하지 않는다.
    pub fn import_plaintext(&self, source: &dyn Backend) -> StoreResult<MigrationResult> {
        let mut entries: Vec<(String, RawValue)> = source
            .get_all()?
            .into_iter()
            .filter(|(name, _)| !is_reserved(name))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut editor = self.edit();
        let mut imported = Vec::new();

        for (name, raw) in &entries {
            let dropped_before = editor.dropped_writes().len();
            match raw {
                RawValue::Text(value) => editor.put_string(name, value),
                RawValue::Int(value) => editor.put_long(name, *value),
                RawValue::TextSet(values) => editor.put_string_set(name, values),
            };
            if editor.dropped_writes().len() == dropped_before {
                imported.push(name.clone());
            }
        }

        let report = editor.commit()?;
        let mut details: Vec<String> = imported.iter().map(|name| format!("✓ {}", name)).collect();
        details.extend(
            report
                .dropped
                .iter()
                .map(|dropped| format!("✗ {} failed: {}", dropped.key, dropped.error)),
        );

        tracing::info!(
            store = %self.name,
            migrated = report.written,
            failed = report.dropped.len(),
            "plaintext import complete"
        );

        Ok(MigrationResult {
            migrated: report.written,
            failed: report.dropped.len(),
            details,
        })
    }
}
