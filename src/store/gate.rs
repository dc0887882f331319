//! 초기화 게이트
//!
//! 프로세스 전역 인스턴스가 필요한 경우 `static`으로 두고 사용한다.
//!
//! ```ignore
//! static STORE: StoreGate = StoreGate::new();
//!
//! STORE.init(options)?;
//! let store = STORE.shared()?;
//! ```
//!
//! 동시에 `init`을 호출해도 초기화는 한 스레드에서만 실행되고, 나머지는
//! 완료될 때까지 대기한 뒤 같은 인스턴스를 받는다.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::StoreOptions;
use crate::error::{StoreError, StoreResult};

use super::SecuredStore;

pub struct StoreGate {
    cell: OnceCell<Arc<SecuredStore>>,
}

impl StoreGate {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// 초기화 (이미 초기화되었다면 경고만 남기고 기존 인스턴스 반환)
    ///
    /// 초기화가 실패하면 게이트는 비어 있는 상태로 남아 다시 시도할 수 있다.
    pub fn init(&self, options: StoreOptions) -> StoreResult<Arc<SecuredStore>> {
        let mut created = false;
        let store = self.cell.get_or_try_init(|| {
            created = true;
            SecuredStore::open(options).map(Arc::new)
        })?;

        if !created {
            tracing::warn!(store = store.name(), "secured store already initialized, ignoring init");
        }
        Ok(store.clone())
    }

    /// 초기화된 인스턴스
    pub fn shared(&self) -> StoreResult<Arc<SecuredStore>> {
        self.cell.get().cloned().ok_or(StoreError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl Default for StoreGate {
    fn default() -> Self {
        Self::new()
    }
}
