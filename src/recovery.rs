//! Recovery Coordinator
//!
//! 보안 키 저장소가 키를 조용히 무효화했을 때(OS 업그레이드, 생체 정보 변경,
//! 키 저장소 초기화 등) 호출된다. 정책이 `true`를 반환하면 마스터키를 새로
//! provisioning 하고 실패한 작업을 다시 시도한다.
//!
//! 기본 정책(`Wipe`)은 파괴적이다: alias와 저장소 내용을 지우므로 이전 암호문은
//! 영구히 복구할 수 없다.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::backend::Backend;
use crate::error::StoreError;
use crate::keystore::SecureKeyFacility;
use crate::master_key::{MasterKeyManager, MASTER_KEY_SLOT};

/// recovery 정책에 전달되는 정보
pub struct RecoveryContext<'a> {
    /// recovery를 유발한 에러
    pub error: &'a StoreError,
    pub facility: &'a dyn SecureKeyFacility,
    /// 이 저장소가 소유한 alias 중 현재 저장된 것
    pub aliases: &'a [String],
    pub backend: &'a dyn Backend,
}

/// 사용자 정의 recovery 정책
///
/// `Ok(true)`: 복구됨, 실패한 작업 재시도.
/// `Ok(false)` 또는 `Err`: 호출자에게 실패 전달.
pub trait RecoveryHandler: Send + Sync {
    fn recover(&self, ctx: &RecoveryContext<'_>) -> Result<bool, StoreError>;
}

impl<F> RecoveryHandler for F
where
    F: Fn(&RecoveryContext<'_>) -> Result<bool, StoreError> + Send + Sync,
{
    fn recover(&self, ctx: &RecoveryContext<'_>) -> Result<bool, StoreError> {
        self(ctx)
    }
}

/// recovery 정책
#[derive(Clone)]
pub enum RecoveryPolicy {
    /// alias 삭제 + 래핑된 키 삭제 (`clear_backend`면 저장소 전체 삭제)
    Wipe { clear_backend: bool },
    /// 복구하지 않고 실패 전달
    Refuse,
    Custom(Arc<dyn RecoveryHandler>),
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        RecoveryPolicy::Wipe {
            clear_backend: true,
        }
    }
}

impl fmt::Debug for RecoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPolicy::Wipe { clear_backend } => f
                .debug_struct("Wipe")
                .field("clear_backend", clear_backend)
                .finish(),
            RecoveryPolicy::Refuse => f.write_str("Refuse"),
            RecoveryPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl RecoveryPolicy {
    pub fn custom(handler: impl RecoveryHandler + 'static) -> Self {
        RecoveryPolicy::Custom(Arc::new(handler))
    }

    fn handle(&self, ctx: &RecoveryContext<'_>) -> Result<bool, StoreError> {
        match self {
            RecoveryPolicy::Wipe { clear_backend } => wipe(ctx, *clear_backend),
            RecoveryPolicy::Refuse => Ok(false),
            RecoveryPolicy::Custom(handler) => handler.recover(ctx),
        }
    }
}

/// 기본 파괴적 복구: alias 전부 삭제 후 래핑된 키(또는 저장소 전체) 삭제.
/// 사용자 정의 정책에서 확인 절차 뒤에 호출할 수 있도록 공개한다.
pub fn wipe(ctx: &RecoveryContext<'_>, clear_backend: bool) -> Result<bool, StoreError> {
    tracing::warn!(
        store = ctx.backend.name(),
        error = %ctx.error,
        aliases = ctx.aliases.len(),
        clear_backend,
        "wiping invalidated key material"
    );

    for alias in ctx.aliases {
        ctx.facility.delete_alias(alias)?;
    }

    let mut editor = ctx.backend.edit();
    if clear_backend {
        editor.clear();
    } else {
        editor.remove(MASTER_KEY_SLOT);
    }
    editor.commit()?;
    Ok(true)
}

/// recovery 진입점. 한 번에 하나의 recovery만 실행된다.
pub struct RecoveryCoordinator {
    policy: RwLock<RecoveryPolicy>,
    gate: Mutex<()>,
    recoveries: AtomicUsize,
}

impl RecoveryCoordinator {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            gate: Mutex::new(()),
            recoveries: AtomicUsize::new(0),
        }
    }

    pub fn set_policy(&self, policy: RecoveryPolicy) {
        *self.policy.write() = policy;
    }

    pub fn policy(&self) -> RecoveryPolicy {
        self.policy.read().clone()
    }

    /// 성공한 recovery 횟수
    pub fn recovery_count(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }

    /// 정책을 실행하고 성공하면 마스터키를 다시 provisioning 한다.
    ///
    /// 정책이 거절하면 `RecoveryDeclined`.
    pub fn recover(
        &self,
        error: &StoreError,
        keys: &MasterKeyManager,
        backend: &dyn Backend,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.lock();
        self.recover_locked(error, keys, backend)
    }

    /// `epoch`(작업 시작 시점의 `recovery_count()`) 이후 다른 호출자가 이미
    /// 복구했다면 아무것도 하지 않는다.
    pub(crate) fn recover_after(
        &self,
        epoch: usize,
        error: &StoreError,
        keys: &MasterKeyManager,
        backend: &dyn Backend,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.lock();
        if self.recovery_count() != epoch {
            tracing::debug!(store = backend.name(), "recovery already performed by another caller");
            return Ok(());
        }
        self.recover_locked(error, keys, backend)
    }

    fn recover_locked(
        &self,
        error: &StoreError,
        keys: &MasterKeyManager,
        backend: &dyn Backend,
    ) -> Result<(), StoreError> {
        let policy = self.policy();
        tracing::warn!(store = backend.name(), error = %error, policy = ?policy, "recovery required");

        let recovered = keys.recover_with(|| {
            let aliases = keys.stored_aliases()?;
            let ctx = RecoveryContext {
                error,
                facility: keys.facility(),
                aliases: &aliases,
                backend,
            };
            policy.handle(&ctx)
        })?;

        if !recovered {
            tracing::error!(store = backend.name(), "recovery declined");
            return Err(StoreError::RecoveryDeclined(error.to_string()));
        }

        self.recoveries.fetch_add(1, Ordering::SeqCst);
        tracing::info!(store = backend.name(), "recovery complete, master key reprovisioned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, RawValue};
    use crate::error::CryptoError;
    use crate::keystore::{KeyAliases, MemoryKeyFacility};
    use crate::master_key::KeyState;

    fn setup() -> (Arc<MemoryKeyFacility>, MemoryBackend, MasterKeyManager) {
        let facility = Arc::new(MemoryKeyFacility::new());
        let backend = MemoryBackend::new("r");
        let manager = MasterKeyManager::new(
            facility.clone(),
            Arc::new(backend.clone()),
            KeyAliases::from_prefix("r"),
            None,
        );
        manager.initialize().unwrap();
        (facility, backend, manager)
    }

    fn invalidated() -> StoreError {
        CryptoError::KeyInvalidated("test".into()).into()
    }

    #[test]
    fn test_default_wipe_clears_backend_and_reprovisions() {
        let (facility, backend, manager) = setup();
        backend.overwrite_raw("entry", RawValue::Text("x1]a]b".into()));

        let coordinator = RecoveryCoordinator::new(RecoveryPolicy::default());
        coordinator.recover(&invalidated(), &manager, &backend).unwrap();

        assert_eq!(facility.deletion_count(), 1);
        assert_eq!(facility.generation_count(), 2);
        assert_eq!(manager.state(), KeyState::Unwrapped);
        assert!(!backend.contains("entry").unwrap());
        assert!(backend.contains(MASTER_KEY_SLOT).unwrap());
        assert_eq!(coordinator.recovery_count(), 1);
    }

    #[test]
    fn test_wipe_without_clear_keeps_entries() {
        let (_, backend, manager) = setup();
        backend.overwrite_raw("entry", RawValue::Text("x1]a]b".into()));

        let coordinator = RecoveryCoordinator::new(RecoveryPolicy::Wipe {
            clear_backend: false,
        });
        coordinator.recover(&invalidated(), &manager, &backend).unwrap();
        assert!(backend.contains("entry").unwrap());
    }

    #[test]
    fn test_refuse_policy_declines() {
        let (facility, backend, manager) = setup();
        let coordinator = RecoveryCoordinator::new(RecoveryPolicy::Refuse);

        let err = coordinator
            .recover(&invalidated(), &manager, &backend)
            .unwrap_err();
        assert_eq!(err.code(), "RECOVERY_DECLINED");
        assert_eq!(facility.deletion_count(), 0);
        assert_eq!(coordinator.recovery_count(), 0);
    }

    #[test]
    fn test_stale_epoch_skips_second_recovery() {
        let (facility, backend, manager) = setup();
        let coordinator = RecoveryCoordinator::new(RecoveryPolicy::default());

        let epoch = coordinator.recovery_count();
        coordinator
            .recover_after(epoch, &invalidated(), &manager, &backend)
            .unwrap();
        coordinator
            .recover_after(epoch, &invalidated(), &manager, &backend)
            .unwrap();

        assert_eq!(coordinator.recovery_count(), 1);
        assert_eq!(facility.deletion_count(), 1);
    }

    #[test]
    fn test_custom_policy_sees_context() {
        let (_, backend, manager) = setup();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();

        let coordinator = RecoveryCoordinator::new(RecoveryPolicy::custom(
            move |ctx: &RecoveryContext<'_>| {
                sink.lock().extend(ctx.aliases.iter().cloned());
                assert!(ctx.error.is_key_invalidated());
                wipe(ctx, false)
            },
        ));
        coordinator.recover(&invalidated(), &manager, &backend).unwrap();
        assert_eq!(*seen.lock(), vec!["r_sps_wrap_key".to_string()]);
    }
}
