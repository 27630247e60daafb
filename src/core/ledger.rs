//! SQLite-backed dedup ledger for delivered chunks.
//!
//! One table keyed by chunk filename. `mark_sent` is an atomic
//! insert-if-absent, so two callers racing on the same key see exactly one
//! `Recorded`. Rows are never evicted.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::DeliveryRecord;
use crate::error::{PipelineError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sent_files (
    filename TEXT PRIMARY KEY,
    sent_at  TEXT NOT NULL
);
";

/// Result of marking a chunk as sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    /// This call inserted the row
    Recorded,

    /// The chunk was already in the ledger
    AlreadyRecorded,
}

impl MarkResult {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Recorded)
    }
}

/// Persistent record of delivered chunks
pub struct DedupLedger {
    conn: Mutex<Connection>,
}

impl DedupLedger {
    /// Open (or create) the ledger database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_connection(path)?;
        Self::init(conn)
    }

    /// Ledger that lives only as long as the process
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::PersistenceFailed("ledger lock poisoned".to_string()))
    }

    pub fn is_sent(&self, filename: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM sent_files WHERE filename = ?1",
                params![filename],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record `filename` as delivered (idempotent)
    pub fn mark_sent(&self, filename: &str) -> Result<MarkResult> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO sent_files (filename, sent_at) VALUES (?1, ?2)",
            params![filename, Utc::now().to_rfc3339()],
        )?;

        Ok(if changed == 1 {
            MarkResult::Recorded
        } else {
            MarkResult::AlreadyRecorded
        })
    }

    pub fn get(&self, filename: &str) -> Result<Option<DeliveryRecord>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT filename, sent_at FROM sent_files WHERE filename = ?1",
                params![filename],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(filename, sent_at)| to_record(filename, &sent_at))
            .transpose()
    }

    pub fn sent_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sent_files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Most recently delivered chunks, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT filename, sent_at FROM sent_files ORDER BY sent_at DESC, filename DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(filename, sent_at)| to_record(filename, &sent_at))
            .collect()
    }
}

/// Open a file-backed connection with WAL journaling and a busy timeout
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    Ok(conn)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::PersistenceFailed(format!("bad timestamp {:?}: {}", value, e)))
}

fn to_record(filename: String, sent_at: &str) -> Result<DeliveryRecord> {
    Ok(DeliveryRecord {
        filename,
        sent_at: parse_timestamp(sent_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_mark_and_query() {
        let ledger = DedupLedger::open_in_memory().unwrap();

        assert!(!ledger.is_sent("1000_1712_000.wav").unwrap());
        assert_eq!(ledger.mark_sent("1000_1712_000.wav").unwrap(), MarkResult::Recorded);
        assert!(ledger.is_sent("1000_1712_000.wav").unwrap());
        assert!(!ledger.is_sent("1000_1712_001.wav").unwrap());

        let record = ledger.get("1000_1712_000.wav").unwrap().unwrap();
        assert_eq!(record.filename, "1000_1712_000.wav");
        assert!(record.sent_at <= Utc::now());
    }

    #[test]
    fn test_mark_is_idempotent() {
        let ledger = DedupLedger::open_in_memory().unwrap();

        assert!(ledger.mark_sent("a_b_000.wav").unwrap().is_new());
        assert_eq!(
            ledger.mark_sent("a_b_000.wav").unwrap(),
            MarkResult::AlreadyRecorded
        );
        assert_eq!(ledger.sent_count().unwrap(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("sent_chunks.db");

        {
            let ledger = DedupLedger::open(&path).unwrap();
            ledger.mark_sent("a_b_000.wav").unwrap();
            ledger.mark_sent("a_b_001.wav").unwrap();
        }

        let reopened = DedupLedger::open(&path).unwrap();
        assert!(reopened.is_sent("a_b_000.wav").unwrap());
        assert!(reopened.is_sent("a_b_001.wav").unwrap());
        assert_eq!(reopened.sent_count().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_marks_record_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sent_chunks.db");
        let ledger = Arc::new(DedupLedger::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.mark_sent("race_1_000.wav").unwrap())
            })
            .collect();

        let recorded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_new())
            .count();

        assert_eq!(recorded, 1);
        assert_eq!(ledger.sent_count().unwrap(), 1);
    }

    #[test]
    fn test_recent_is_bounded() {
        let ledger = DedupLedger::open_in_memory().unwrap();
        for i in 0..5 {
            ledger.mark_sent(&format!("a_b_{:03}.wav", i)).unwrap();
        }

        let recent = ledger.recent(3).unwrap();
        assert_eq!(recent.len(), 3);
    }
}
