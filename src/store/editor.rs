//! 일괄 편집기
//!
//! 암호화는 put 호출 시점에 즉시 수행된다. 암호화에 실패한 put은 로그를 남기고
//! 버려지며(`DroppedWrite`), 나머지 변경만 저장소 트랜잭션으로 전달된다.

use std::collections::BTreeSet;
use std::mem;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::backend::{BackendEditor, RawValue};
use crate::crypto::hash_key_name;
use crate::error::{StoreError, StoreResult};

use super::outcome::{DroppedWrite, EditReport};
use super::{is_reserved, SecuredStore};

/// `SecuredStore::edit()`가 반환하는 편집기
pub struct Editor<'a> {
    store: &'a SecuredStore,
    clear: bool,
    ops: Vec<(String, Option<RawValue>)>,
    written: usize,
    dropped: Vec<DroppedWrite>,
}

impl<'a> Editor<'a> {
    pub(crate) fn new(store: &'a SecuredStore) -> Self {
        Self {
            store,
            clear: false,
            ops: Vec::new(),
            written: 0,
            dropped: Vec::new(),
        }
    }

    pub fn put_string(&mut self, key: &str, value: &str) -> &mut Self {
        let sealed = self
            .store
            .seal_text(key, value)
            .map(|(id, blob)| (id, RawValue::Text(blob)));
        self.queue(key, sealed)
    }

    pub fn put_int(&mut self, key: &str, value: i32) -> &mut Self {
        self.put_string(key, &value.to_string())
    }

    pub fn put_long(&mut self, key: &str, value: i64) -> &mut Self {
        self.put_string(key, &value.to_string())
    }

    pub fn put_float(&mut self, key: &str, value: f32) -> &mut Self {
        self.put_string(key, &value.to_string())
    }

    pub fn put_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.put_string(key, &value.to_string())
    }

    /// `None`이면 키 삭제
    pub fn put_bytes(&mut self, key: &str, value: Option<&[u8]>) -> &mut Self {
        match value {
            Some(bytes) => self.put_string(key, &BASE64.encode(bytes)),
            None => self.remove(key),
        }
    }

    /// 멤버별로 암호화. 하나라도 실패하면 집합 전체를 버린다.
    pub fn put_string_set<I, S>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = self.store;
        let sealed = hash_key_name(key).and_then(|id| {
            let plain: BTreeSet<String> = values
                .into_iter()
                .map(|v| v.as_ref().to_string())
                .collect();
            let members = plain
                .iter()
                .map(|member| store.encrypt(member.as_bytes()))
                .collect::<StoreResult<BTreeSet<String>>>()?;
            Ok((id, RawValue::TextSet(members)))
        });
        self.queue(key, sealed)
    }

    pub fn remove(&mut self, key: &str) -> &mut Self {
        match hash_key_name(key) {
            Ok(id) => {
                self.ops.push((id, None));
                self.written += 1;
            }
            Err(e) => self.drop_write(key, e),
        }
        self
    }

    /// 사용자 엔트리 전체 삭제. 호출 순서와 관계없이 다른 변경보다 먼저 적용된다.
    /// 버전 마커와 마스터키 슬롯은 유지된다.
    pub fn clear(&mut self) -> &mut Self {
        self.clear = true;
        self
    }

    /// 지금까지 버려진 쓰기
    pub fn dropped_writes(&self) -> &[DroppedWrite] {
        &self.dropped
    }

    /// 동기 커밋. 커밋 후 편집기는 비워져 다시 사용할 수 있다.
    pub fn commit(&mut self) -> StoreResult<EditReport> {
        let store = self.store;
        let (batch, report) = self.take_batch();
        batch?.commit()?;
        tracing::debug!(
            store = store.name(),
            written = report.written,
            dropped = report.dropped.len(),
            "edit committed"
        );
        Ok(report)
    }

    /// 비동기 반영. 저장소 실패는 로그로만 남는다.
    pub fn apply(&mut self) -> EditReport {
        let store = self.store;
        let (batch, report) = self.take_batch();
        match batch {
            Ok(batch) => batch.apply(),
            Err(e) => tracing::error!(store = store.name(), error = %e, "edit discarded"),
        }
        report
    }

    fn queue(&mut self, key: &str, sealed: StoreResult<(String, RawValue)>) -> &mut Self {
        match sealed {
            Ok((id, value)) => {
                self.ops.push((id, Some(value)));
                self.written += 1;
            }
            Err(e) => self.drop_write(key, e),
        }
        self
    }

    fn drop_write(&mut self, key: &str, error: StoreError) {
        tracing::warn!(
            store = self.store.name(),
            code = error.code(),
            error = %error,
            "write dropped"
        );
        self.dropped.push(DroppedWrite {
            key: key.to_string(),
            error,
        });
    }

    fn take_batch(&mut self) -> (StoreResult<Box<dyn BackendEditor>>, EditReport) {
        let report = EditReport {
            written: mem::take(&mut self.written),
            dropped: mem::take(&mut self.dropped),
        };
        let clear = mem::take(&mut self.clear);
        let ops = mem::take(&mut self.ops);
        (build_batch(self.store, clear, ops), report)
    }
}

/// 예약 엔트리를 남긴 clear → 큐에 쌓인 순서대로 put/remove
fn build_batch(
    store: &SecuredStore,
    clear: bool,
    ops: Vec<(String, Option<RawValue>)>,
) -> StoreResult<Box<dyn BackendEditor>> {
    let backend = store.backend();
    let mut batch = backend.edit();
    if clear {
        for id in backend.get_all()?.into_keys() {
            if !is_reserved(&id) {
                batch.remove(&id);
            }
        }
    }
    for (id, value) in ops {
        match value {
            Some(value) => batch.put(&id, value),
            None => batch.remove(&id),
        }
    }
    Ok(batch)
}
