//! SQLite Backend
//!
//! 저장소 이름마다 `<dir>/<name>.db` 파일 하나를 사용한다.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use super::schema;
use super::{
    Backend, BackendEditor, BackendProvider, ChangeListener, EditOp, ListenerId,
    ListenerRegistry, PendingEdits, RawValue,
};
use crate::error::BackendError;

struct Inner {
    name: String,
    conn: Mutex<Connection>,
    listeners: ListenerRegistry,
}

/// SQLite 저장소
#[derive(Clone)]
pub struct SqliteBackend {
    inner: Arc<Inner>,
}

impl SqliteBackend {
    /// 파일 기반 저장소 열기 (스키마 자동 생성)
    pub fn open(name: &str, path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(name, conn)
    }

    pub fn open_in_memory(name: &str) -> Result<Self, BackendError> {
        Self::with_connection(name, Connection::open_in_memory()?)
    }

    fn with_connection(name: &str, conn: Connection) -> Result<Self, BackendError> {
        conn.execute_batch(schema::CREATE_SCHEMA)?;
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                conn: Mutex::new(conn),
                listeners: ListenerRegistry::default(),
            }),
        })
    }
}

fn encode_value(value: &RawValue) -> Result<(&'static str, String), BackendError> {
    Ok(match value {
        RawValue::Int(v) => ("int", v.to_string()),
        RawValue::Text(v) => ("text", v.clone()),
        RawValue::TextSet(v) => ("text_set", serde_json::to_string(v)?),
    })
}

fn decode_value(kind: &str, value: String) -> Result<RawValue, BackendError> {
    match kind {
        "int" => value
            .parse::<i64>()
            .map(RawValue::Int)
            .map_err(|e| BackendError::Unavailable(format!("corrupt int entry: {}", e))),
        "text" => Ok(RawValue::Text(value)),
        "text_set" => Ok(RawValue::TextSet(serde_json::from_str::<BTreeSet<String>>(
            &value,
        )?)),
        other => Err(BackendError::Unavailable(format!(
            "unknown entry kind: {}",
            other
        ))),
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn get(&self, id: &str) -> Result<Option<RawValue>, BackendError> {
        let conn = self.inner.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT kind, value FROM entries WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(kind, value)| decode_value(&kind, value))
            .transpose()
    }

    fn get_all(&self) -> Result<HashMap<String, RawValue>, BackendError> {
        let conn = self.inner.conn.lock();
        let mut stmt = conn.prepare("SELECT id, kind, value FROM entries")?;
        let iter = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = HashMap::new();
        for row in iter {
            let (id, kind, value) = row?;
            out.insert(id, decode_value(&kind, value)?);
        }
        Ok(out)
    }

    fn contains(&self, id: &str) -> Result<bool, BackendError> {
        let conn = self.inner.conn.lock();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM entries WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn edit(&self) -> Box<dyn BackendEditor> {
        Box::new(SqliteEditor {
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

struct SqliteEditor {
    inner: Arc<Inner>,
    edits: PendingEdits,
}

fn write_edits(inner: &Inner, edits: PendingEdits) -> Result<(), BackendError> {
    let touched = {
        let conn = inner.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let existing = if edits.clear {
            let mut stmt = tx.prepare("SELECT id FROM entries")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            tx.execute("DELETE FROM entries", [])?;
            ids
        } else {
            Vec::new()
        };
        let touched = edits.touched_ids(existing);

        for op in edits.ops {
            match op {
                EditOp::Put(id, value) => {
                    let (kind, encoded) = encode_value(&value)?;
                    tx.execute(
                        "INSERT OR REPLACE INTO entries (id, kind, value) VALUES (?1, ?2, ?3)",
                        (&id, kind, &encoded),
                    )?;
                }
                EditOp::Remove(id) => {
                    tx.execute("DELETE FROM entries WHERE id = ?1", [&id])?;
                }
            }
        }

        tx.commit()?;
        touched
    };

    inner.listeners.notify(&touched);
    Ok(())
}

impl BackendEditor for SqliteEditor {
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
        let SqliteEditor { inner, edits } = *self;
        write_edits(&inner, edits)
    }

    fn apply(self: Box<Self>) {
        let SqliteEditor { inner, edits } = *self;
        std::thread::spawn(move || {
            if let Err(e) = write_edits(&inner, edits) {
                tracing::warn!(store = %inner.name, error = %e, "apply failed");
            }
        });
    }
}

/// 디렉토리 기반 SQLite provider
pub struct SqliteProvider {
    dir: PathBuf,
    opened: Mutex<HashMap<String, SqliteBackend>>,
}

impl SqliteProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            opened: Mutex::new(HashMap::new()),
        }
    }

    /// `<dir>/<name>.db`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.db", name))
    }
}

impl BackendProvider for SqliteProvider {
    fn open(&self, name: &str) -> Result<Arc<dyn Backend>, BackendError> {
        let mut opened = self.opened.lock();
        if let Some(existing) = opened.get(name) {
            return Ok(Arc::new(existing.clone()));
        }
        let backend = SqliteBackend::open(name, &self.path_for(name))?;
        opened.insert(name.to_string(), backend.clone());
        Ok(Arc::new(backend))
    }
}
