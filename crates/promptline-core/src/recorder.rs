//! SQLite usage log
//!
//! Token counts are buffered in memory and written to the `usage_log` table
//! in batches. Write failures are logged and never surface to the caller.

use crate::error::{Error, Result};
use crate::response::Usage;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Batches kept in memory while the database refuses writes
const MAX_PENDING_BATCHES: usize = 10;

const COLUMNS: &[(&str, &str)] = &[
    ("timestamp", "TEXT"),
    ("model", "TEXT"),
    ("request_id", "TEXT"),
    ("trace_id", "TEXT"),
    ("prompt_tokens", "INTEGER"),
    ("completion_tokens", "INTEGER"),
    ("total_tokens", "INTEGER"),
    ("thoughts_token_count", "INTEGER"),
];

/// One row of the usage log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub timestamp: String,
    pub model: Option<String>,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub usage: Usage,
}

#[derive(Debug)]
pub struct UsageRecorder {
    db_path: PathBuf,
    batch_size: usize,
    buffer: Mutex<Vec<UsageRecord>>,
}

impl UsageRecorder {
    /// Open (creating if needed) the database at `db_path`
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        ensure_table(&db_path).map_err(|e| {
            Error::config_with_source(format!("cannot prepare usage log at {}", db_path.display()), e)
        })?;
        Ok(Self {
            db_path,
            batch_size: DEFAULT_BATCH_SIZE,
            buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<UsageRecord>> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Most rows held back after failed writes
    pub fn max_pending(&self) -> usize {
        self.batch_size * MAX_PENDING_BATCHES
    }

    /// Rows waiting to be written
    pub fn pending(&self) -> usize {
        self.buffer().len()
    }

    /// Queue a row; a missing or empty usage block is ignored
    pub fn record(&self, model: Option<&str>, request_id: Option<&str>, trace_id: Option<&str>, usage: Option<&Usage>) {
        let Some(usage) = usage.filter(|u| !u.is_empty()) else {
            return;
        };
        let row = UsageRecord {
            timestamp: Utc::now().to_rfc3339(),
            model: model.map(str::to_string),
            request_id: request_id.map(str::to_string),
            trace_id: trace_id.map(str::to_string),
            usage: usage.clone(),
        };

        let mut buffer = self.buffer();
        buffer.push(row);
        if buffer.len() >= self.batch_size {
            self.write_buffer(&mut buffer);
        }
    }

    /// Write all buffered rows
    pub fn flush(&self) {
        let mut buffer = self.buffer();
        self.write_buffer(&mut buffer);
    }

    fn write_buffer(&self, buffer: &mut Vec<UsageRecord>) {
        if buffer.is_empty() {
            return;
        }
        match insert_rows(&self.db_path, buffer) {
            Ok(()) => {
                debug!(rows = buffer.len(), db = %self.db_path.display(), "Usage rows written");
                buffer.clear();
            }
            Err(e) => {
                error!(error = %e, db = %self.db_path.display(), "Failed to write usage rows");
                let overflow = buffer.len().saturating_sub(self.max_pending());
                if overflow > 0 {
                    buffer.drain(..overflow);
                    warn!(dropped = overflow, db = %self.db_path.display(), "Dropped oldest usage rows");
                }
            }
        }
    }
}

impl Drop for UsageRecorder {
    fn drop(&mut self) {
        self.flush();
    }
}

fn ensure_table(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    let defs: Vec<String> = COLUMNS.iter().map(|(name, ty)| format!("{} {}", name, ty)).collect();
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS usage_log (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
            defs.join(", ")
        ),
        [],
    )?;

    let existing: HashSet<String> = {
        let mut stmt = conn.prepare("PRAGMA table_info(usage_log)")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        names.collect::<rusqlite::Result<_>>()?
    };
    for (name, ty) in COLUMNS {
        if !existing.contains(*name) {
            conn.execute(&format!("ALTER TABLE usage_log ADD COLUMN {} {}", name, ty), [])?;
        }
    }
    Ok(())
}

fn insert_rows(path: &Path, rows: &[UsageRecord]) -> rusqlite::Result<()> {
    let mut conn = Connection::open(path)?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO usage_log (timestamp, model, request_id, trace_id, prompt_tokens, \
             completion_tokens, total_tokens, thoughts_token_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.timestamp,
                row.model,
                row.request_id,
                row.trace_id,
                row.usage.prompt_tokens,
                row.usage.completion_tokens,
                row.usage.total_tokens,
                row.usage.thinking_tokens,
            ])?;
        }
    }
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn usage(total: i64) -> Usage {
        Usage {
            prompt_tokens: Some(1),
            completion_tokens: Some(total - 1),
            total_tokens: Some(total),
            thinking_tokens: None,
        }
    }

    fn count(path: &Path) -> i64 {
        Connection::open(path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM usage_log", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_batches_until_threshold() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("logs/usage.db");
        let recorder = UsageRecorder::open(&db).unwrap().with_batch_size(3);

        recorder.record(Some("m"), Some("r1"), Some("t"), Some(&usage(5)));
        recorder.record(Some("m"), Some("r2"), Some("t"), Some(&usage(5)));
        assert_eq!(count(&db), 0);
        assert_eq!(recorder.pending(), 2);

        recorder.record(Some("m"), Some("r3"), None, Some(&usage(5)));
        assert_eq!(count(&db), 3);
        assert_eq!(recorder.pending(), 0);
    }

    #[test]
    fn test_flush_and_drop() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("usage.db");
        {
            let recorder = UsageRecorder::open(&db).unwrap();
            recorder.record(Some("m"), None, None, Some(&usage(2)));
            recorder.flush();
            assert_eq!(count(&db), 1);
            recorder.record(Some("m"), None, None, Some(&usage(2)));
        }
        assert_eq!(count(&db), 2);
    }

    #[test]
    fn test_unwritable_db_keeps_newest_rows() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("usage.db");
        let recorder = UsageRecorder::open(&db).unwrap().with_batch_size(2);
        Connection::open(&db).unwrap().execute("DROP TABLE usage_log", []).unwrap();

        for i in 0..50 {
            recorder.record(Some("m"), Some(&format!("r{:02}", i)), None, Some(&usage(3)));
        }
        assert_eq!(recorder.max_pending(), 20);
        assert!(recorder.pending() <= recorder.max_pending());

        ensure_table(&db).unwrap();
        let pending = recorder.pending() as i64;
        recorder.flush();
        assert_eq!(count(&db), pending);
        let newest: String = Connection::open(&db)
            .unwrap()
            .query_row("SELECT MAX(request_id) FROM usage_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(newest, "r49");
    }

    #[test]
    fn test_empty_usage_is_ignored() {
        let dir = TempDir::new().unwrap();
        let recorder = UsageRecorder::open(dir.path().join("u.db")).unwrap();
        recorder.record(Some("m"), None, None, None);
        recorder.record(Some("m"), None, None, Some(&Usage::default()));
        assert_eq!(recorder.pending(), 0);
    }

    #[test]
    fn test_adds_missing_columns() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("old.db");
        Connection::open(&db)
            .unwrap()
            .execute(
                "CREATE TABLE usage_log (id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TEXT, model TEXT)",
                [],
            )
            .unwrap();

        let recorder = UsageRecorder::open(&db).unwrap();
        recorder.record(
            Some("m"),
            None,
            None,
            Some(&Usage {
                thinking_tokens: Some(9),
                ..usage(4)
            }),
        );
        recorder.flush();

        let thoughts: i64 = Connection::open(&db)
            .unwrap()
            .query_row("SELECT thoughts_token_count FROM usage_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(thoughts, 9);
    }
}
