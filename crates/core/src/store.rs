//! Subtitle record persistence.
//!
//! Stores enforce one record per `(video_id, track_index)`; the first write
//! wins and later writes report [`SaveOutcome::AlreadyExists`].

use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// A finished subtitle track, never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleRecord {
    pub video_id: String,
    pub track_index: usize,
    /// Canonical three-letter code or `unknown`.
    pub language: String,
    pub text: String,
}

/// What a save did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    AlreadyExists,
}

/// Persists subtitle records. Must tolerate concurrent saves.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save(&self, record: &SubtitleRecord) -> Result<SaveOutcome, StoreError>;

    /// Records of one video ordered by track index.
    async fn records(&self, video_id: &str) -> Result<Vec<SubtitleRecord>, StoreError>;
}

/// In-process store, mainly for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<BTreeMap<(String, usize), SubtitleRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: &SubtitleRecord) -> Result<SaveOutcome, StoreError> {
        let mut records = self.records.lock();
        let key = (record.video_id.clone(), record.track_index);
        if records.contains_key(&key) {
            return Ok(SaveOutcome::AlreadyExists);
        }
        records.insert(key, record.clone());
        Ok(SaveOutcome::Inserted)
    }

    async fn records(&self, video_id: &str) -> Result<Vec<SubtitleRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.video_id == video_id)
            .cloned()
            .collect())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subtitles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id TEXT NOT NULL,
    track_index INTEGER NOT NULL,
    language TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (video_id, track_index)
);
"#;

/// SQLite-backed store; the unique constraint is the source of truth.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        trace!("open sqlite store path={}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save(&self, record: &SubtitleRecord) -> Result<SaveOutcome, StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO subtitles (video_id, track_index, language, text)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.video_id,
                    record.track_index as i64,
                    record.language,
                    record.text
                ],
            )?;
            if changed == 0 {
                debug!(
                    "record for video {} track {} already stored",
                    record.video_id, record.track_index
                );
                Ok(SaveOutcome::AlreadyExists)
            } else {
                Ok(SaveOutcome::Inserted)
            }
        })
        .await
    }

    async fn records(&self, video_id: &str) -> Result<Vec<SubtitleRecord>, StoreError> {
        let video_id = video_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT video_id, track_index, language, text FROM subtitles
                 WHERE video_id = ?1 ORDER BY track_index",
            )?;
            let rows = stmt.query_map([&video_id], |row| {
                Ok(SubtitleRecord {
                    video_id: row.get(0)?,
                    track_index: row.get::<_, i64>(1)? as usize,
                    language: row.get(2)?,
                    text: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}
