//! 관대한(lenient) 읽기/쓰기 결과 타입
//!
//! 읽기 실패는 기본값으로, 쓰기 실패는 해당 키 누락으로 처리되지만
//! 억제된 에러는 여기 남겨서 호출자와 테스트가 확인할 수 있다.

use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;

use crate::error::StoreError;

/// 값 + 억제된 에러
#[derive(Debug)]
pub struct Lenient<T> {
    value: T,
    suppressed: Option<StoreError>,
}

impl<T> Lenient<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            suppressed: None,
        }
    }

    pub fn degraded(value: T, error: StoreError) -> Self {
        Self {
            value,
            suppressed: Some(error),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn suppressed(&self) -> Option<&StoreError> {
        self.suppressed.as_ref()
    }

    /// 기본값이 실패 때문에 반환되었는지 여부
    pub fn is_degraded(&self) -> bool {
        self.suppressed.is_some()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lenient<U> {
        Lenient {
            value: f(self.value),
            suppressed: self.suppressed,
        }
    }
}

impl<T> Deref for Lenient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// 복호화된 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Text(String),
    TextSet(BTreeSet<String>),
    /// 암호화되지 않은 정수 (레거시 엔트리)
    Int(i64),
}

/// `get_all()` 결과: 해시 식별자 → 값, 복호화 실패로 건너뛴 식별자
#[derive(Debug, Default)]
pub struct Snapshot {
    pub entries: HashMap<String, StoreValue>,
    pub skipped: Vec<String>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// 암호화 실패로 기록되지 않은 쓰기
#[derive(Debug)]
pub struct DroppedWrite {
    pub key: String,
    pub error: StoreError,
}

/// 편집 결과
#[derive(Debug, Default)]
pub struct EditReport {
    pub written: usize,
    pub dropped: Vec<DroppedWrite>,
}

impl EditReport {
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }
}
