//! In-memory Backend
//!
//! 프로세스 내부 저장소. 테스트와 헤드리스 환경에서 사용하며,
//! 같은 provider에서 같은 이름으로 열면 같은 저장소를 공유한다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{
    Backend, BackendEditor, BackendProvider, ChangeListener, EditOp, ListenerId,
    ListenerRegistry, PendingEdits, RawValue,
};
use crate::error::BackendError;

struct Inner {
    name: String,
    entries: RwLock<HashMap<String, RawValue>>,
    listeners: ListenerRegistry,
    fail_commits: AtomicBool,
}

/// 메모리 저장소 (clone 시 같은 데이터를 공유)
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                entries: RwLock::new(HashMap::new()),
                listeners: ListenerRegistry::default(),
                fail_commits: AtomicBool::new(false),
            }),
        }
    }

    /// 이후 커밋을 모두 실패시킨다 (장애 주입)
    pub fn set_fail_commits(&self, fail: bool) {
        self.inner.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// 원시 엔트리를 직접 덮어쓴다 (변조 시뮬레이션)
    pub fn overwrite_raw(&self, id: &str, value: RawValue) {
        self.inner.entries.write().insert(id.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn get(&self, id: &str) -> Result<Option<RawValue>, BackendError> {
        Ok(self.inner.entries.read().get(id).cloned())
    }

    fn get_all(&self) -> Result<HashMap<String, RawValue>, BackendError> {
        Ok(self.inner.entries.read().clone())
    }

    fn contains(&self, id: &str) -> Result<bool, BackendError> {
        Ok(self.inner.entries.read().contains_key(id))
    }

    fn edit(&self) -> Box<dyn BackendEditor> {
        Box::new(MemoryEditor {
            inner: self.inner.clone(),
            edits: PendingEdits::default(),
        })
    }

    fn register_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.inner.listeners.register(listener)
    }

    fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.unregister(id)
    }
}

struct MemoryEditor {
    inner: Arc<Inner>,
    edits: PendingEdits,
}

impl MemoryEditor {
    fn write_through(self) -> Result<(), BackendError> {
        if self.inner.fail_commits.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!(
                "commit rejected for {}",
                self.inner.name
            )));
        }

        let touched = {
            let mut entries = self.inner.entries.write();
            let touched = self.edits.touched_ids(entries.keys().cloned());
            if self.edits.clear {
                entries.clear();
            }
            for op in self.edits.ops {
                match op {
                    EditOp::Put(id, value) => {
                        entries.insert(id, value);
                    }
                    EditOp::Remove(id) => {
                        entries.remove(&id);
                    }
                }
            }
            touched
        };

        self.inner.listeners.notify(&touched);
        Ok(())
    }
}

impl BackendEditor for MemoryEditor {
    fn put(&mut self, id: &str, value: RawValue) {
        self.edits.put(id, value);
    }

    fn remove(&mut self, id: &str) {
        self.edits.remove(id);
    }

    fn clear(&mut self) {
        self.edits.clear = true;
    }

    fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.write_through()
    }

    fn apply(self: Box<Self>) {
        let name = self.inner.name.clone();
        if let Err(e) = self.write_through() {
            tracing::warn!(store = %name, error = %e, "apply failed");
        }
    }
}

/// 이름별 메모리 저장소 provider
#[derive(Default)]
pub struct MemoryProvider {
    stores: Mutex<HashMap<String, MemoryBackend>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 열린 적이 없으면 새로 만들어 반환
    pub fn backend(&self, name: &str) -> MemoryBackend {
        self.stores
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| MemoryBackend::new(name))
            .clone()
    }
}

impl BackendProvider for MemoryProvider {
    fn open(&self, name: &str) -> Result<Arc<dyn Backend>, BackendError> {
        Ok(Arc::new(self.backend(name)))
    }
}
