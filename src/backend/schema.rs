//! Database Schema
//!
//! SQLite 저장소 테이블 스키마 정의

/// 데이터베이스 스키마 생성 SQL
pub const CREATE_SCHEMA: &str = r#"
-- 엔트리 테이블 (id = 해시된 식별자 또는 예약 슬롯)
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('int', 'text', 'text_set')),
    value TEXT NOT NULL  -- text_set은 JSON Array
);
"#;
