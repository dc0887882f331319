//! Backend Module
//!
//! 암호화 계층 아래에 놓이는 평문 키-값 저장소 인터페이스.
//! 저장소는 해시된 식별자와 암호문 blob만 보게 된다.

pub mod memory;
pub mod sqlite;
mod schema;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

pub use memory::{MemoryBackend, MemoryProvider};
pub use sqlite::{SqliteBackend, SqliteProvider};

/// 저장소에 기록되는 원시 값
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RawValue {
    Int(i64),
    Text(String),
    TextSet(BTreeSet<String>),
}

impl RawValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RawValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            RawValue::TextSet(v) => Some(v),
            _ => None,
        }
    }
}

/// 변경 리스너 식별자
pub type ListenerId = u64;

/// 커밋된 엔트리 변경 통지
pub trait ChangeListener: Send + Sync {
    fn on_changed(&self, id: &str);
}

impl<F> ChangeListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_changed(&self, id: &str) {
        self(id)
    }
}

/// 원자적 get/put/remove/clear + 일괄 편집을 제공하는 저장소
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, id: &str) -> Result<Option<RawValue>, BackendError>;

    fn get_all(&self) -> Result<HashMap<String, RawValue>, BackendError>;

    fn contains(&self, id: &str) -> Result<bool, BackendError>;

    fn edit(&self) -> Box<dyn BackendEditor>;

    fn register_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId;

    fn unregister_listener(&self, id: ListenerId) -> bool;
}

/// 일괄 편집 트랜잭션
///
/// `clear()`는 호출 순서와 관계없이 다른 put/remove보다 먼저 적용된다.
pub trait BackendEditor: Send {
    fn put(&mut self, id: &str, value: RawValue);

    fn remove(&mut self, id: &str);

    fn clear(&mut self);

    /// 동기 커밋
    fn commit(self: Box<Self>) -> Result<(), BackendError>;

    /// 비동기 반영 (fire-and-forget, 실패는 로그만 남김)
    fn apply(self: Box<Self>);
}

/// 이름으로 저장소를 여는 provider (앱 컨텍스트 역할)
pub trait BackendProvider: Send + Sync {
    fn open(&self, name: &str) -> Result<Arc<dyn Backend>, BackendError>;
}

#[derive(Debug, Clone)]
pub(crate) enum EditOp {
    Put(String, RawValue),
    Remove(String),
}

/// 커밋 전까지 쌓이는 편집 내역
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingEdits {
    pub clear: bool,
    pub ops: Vec<EditOp>,
}

impl PendingEdits {
    pub fn put(&mut self, id: &str, value: RawValue) {
        self.ops.push(EditOp::Put(id.to_string(), value));
    }

    pub fn remove(&mut self, id: &str) {
        self.ops.push(EditOp::Remove(id.to_string()));
    }

    /// 변경된 식별자 목록 (clear 시에는 기존 식별자 포함)
    pub fn touched_ids(&self, existing: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut ids: BTreeSet<String> = BTreeSet::new();
        if self.clear {
            ids.extend(existing);
        }
        for op in &self.ops {
            match op {
                EditOp::Put(id, _) | EditOp::Remove(id) => {
                    ids.insert(id.clone());
                }
            }
        }
        ids.into_iter().collect()
    }
}

/// 리스너 레지스트리 (backend 구현 공용)
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ChangeListener>)>>,
}

impl ListenerRegistry {
    pub fn register(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn notify(&self, ids: &[String]) {
        // 콜백 중 재등록을 허용하기 위해 lock 밖에서 호출
        let listeners: Vec<Arc<dyn ChangeListener>> =
            self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for id in ids {
            for listener in &listeners {
                listener.on_changed(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_touched_ids_include_cleared_entries() {
        let mut edits = PendingEdits::default();
        edits.clear = true;
        edits.put("b", RawValue::Int(1));
        edits.remove("c");

        let ids = edits.touched_ids(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_listener_registry() {
        let registry = ListenerRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = registry.register(Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.notify(&["x".to_string(), "y".to_string()]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.notify(&["z".to_string()]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
