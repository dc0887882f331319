//! Migration Runner
//!
//! 애플리케이션이 명시적으로 호출하는 1회성 변환. 지정한 이름의 저장소를 열어
//! 원시 내용(암호문 또는 레거시 포맷)에 대한 전체 접근을 handler에 넘긴다.
//! 버전 마커 기반 자동 판별(`store` 모듈)과는 별개다.

use serde::Serialize;

use crate::backend::{Backend, BackendProvider};
use crate::error::{StoreError, StoreResult};

/// 원시 저장소 변환 handler
pub trait MigrationHandler {
    fn migrate(&self, backend: &dyn Backend) -> Result<(), StoreError>;
}

impl<F> MigrationHandler for F
where
    F: Fn(&dyn Backend) -> Result<(), StoreError>,
{
    fn migrate(&self, backend: &dyn Backend) -> Result<(), StoreError> {
        self(backend)
    }
}

/// `store_name` 저장소를 열어 handler 실행
///
/// 저장소 에러는 그대로, 그 밖의 실패는 `Migration`으로 감싸서 반환한다.
pub fn migrate(
    provider: &dyn BackendProvider,
    store_name: &str,
    handler: &dyn MigrationHandler,
) -> StoreResult<()> {
    let backend = provider.open(store_name)?;
    tracing::info!(store = store_name, "running migration");

    handler.migrate(backend.as_ref()).map_err(|e| match e {
        StoreError::Backend(_) | StoreError::Migration(_) => e,
        other => StoreError::Migration(other.to_string()),
    })?;

    tracing::info!(store = store_name, "migration complete");
    Ok(())
}

/// 마이그레이션 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationResult {
    pub migrated: usize,
    pub failed: usize,
    pub details: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryProvider, RawValue};
    use crate::error::BackendError;

    #[test]
    fn test_migrate_sees_raw_contents() {
        let provider = MemoryProvider::new();
        provider
            .backend("legacy")
            .overwrite_raw("token", RawValue::Text("plain".into()));

        migrate(&provider, "legacy", &|backend: &dyn Backend| {
            let mut editor = backend.edit();
            for (id, value) in backend.get_all()? {
                if let RawValue::Text(text) = value {
                    editor.put(&id, RawValue::Text(text.to_uppercase()));
                }
            }
            editor.commit()?;
            Ok(())
        })
        .unwrap();

        let value = provider.backend("legacy").get("token").unwrap();
        assert_eq!(value, Some(RawValue::Text("PLAIN".into())));
    }

    #[test]
    fn test_handler_errors_are_wrapped() {
        let provider = MemoryProvider::new();

        let err = migrate(&provider, "s", &|_: &dyn Backend| -> StoreResult<()> {
            Err(StoreError::InvalidKey)
        })
        .unwrap_err();
        assert_eq!(err.code(), "MIGRATION_FAILURE");

        let err = migrate(&provider, "s", &|_: &dyn Backend| -> StoreResult<()> {
            Err(BackendError::Unavailable("disk".into()).into())
        })
        .unwrap_err();
        assert!(err.is_backend_failure());
    }

    #[test]
    fn test_result_serializes() {
        let result = MigrationResult {
            migrated: 2,
            failed: 0,
            details: vec!["✓ a".to_string()],
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"migrated\":2"));
    }
}
