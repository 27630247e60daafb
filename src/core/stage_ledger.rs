//! Durable per-stage processing records.
//!
//! Each stage claims a key (source filename or absolute path) before doing
//! expensive work. A claim is `complete`d when the stage is done with the key
//! for good, or `release`d so a later cycle retries it. Claims left behind by
//! a crashed run are dropped with `reset_incomplete` at startup.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::ledger::open_connection;
use crate::error::{PipelineError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stage_records (
    stage      TEXT NOT NULL,
    key        TEXT NOT NULL,
    state      TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (stage, key)
);
";

/// Pipeline stages that keep processed records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Raw recording → chunks
    Split,

    /// Received chunk → classification result
    Classify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Classify => "classify",
        }
    }
}

/// State of a stage record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Work in progress
    Claimed,

    /// Finished (successfully or permanently failed)
    Done,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claimed => write!(f, "claimed"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl FromStr for StageState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claimed" => Ok(Self::Claimed),
            "done" => Ok(Self::Done),
            other => Err(PipelineError::PersistenceFailed(format!(
                "unknown stage state: {}",
                other
            ))),
        }
    }
}

/// Result of claiming a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed,
    AlreadyClaimed(StageState),
}

impl ClaimResult {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

pub struct StageLedger {
    conn: Mutex<Connection>,
    durable: bool,
}

impl StageLedger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(open_connection(path)?, true)
    }

    /// Records that last only for this process
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, false)
    }

    fn init(conn: Connection, durable: bool) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            durable,
        })
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::PersistenceFailed("stage ledger lock poisoned".to_string()))
    }

    /// Claim `key` for `stage` unless some record already exists
    pub fn claim(&self, stage: Stage, key: &str) -> Result<ClaimResult> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO stage_records (stage, key, state, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                stage.as_str(),
                key,
                StageState::Claimed.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        if changed == 1 {
            return Ok(ClaimResult::Claimed);
        }

        let state = read_state(&conn, stage, key)?.unwrap_or(StageState::Claimed);
        Ok(ClaimResult::AlreadyClaimed(state))
    }

    /// Mark `key` finished; works with or without a prior claim
    pub fn complete(&self, stage: Stage, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO stage_records (stage, key, state, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(stage, key) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![
                stage.as_str(),
                key,
                StageState::Done.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Drop the record so the key is retried
    pub fn release(&self, stage: Stage, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM stage_records WHERE stage = ?1 AND key = ?2",
            params![stage.as_str(), key],
        )?;
        Ok(())
    }

    /// Drop every unfinished claim of `stage`; returns how many were dropped
    pub fn reset_incomplete(&self, stage: Stage) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM stage_records WHERE stage = ?1 AND state = ?2",
            params![stage.as_str(), StageState::Claimed.to_string()],
        )?;
        Ok(removed)
    }

    /// Whether any record (claimed or done) exists for `key`
    pub fn is_recorded(&self, stage: Stage, key: &str) -> Result<bool> {
        Ok(self.state(stage, key)?.is_some())
    }

    pub fn state(&self, stage: Stage, key: &str) -> Result<Option<StageState>> {
        let conn = self.conn()?;
        read_state(&conn, stage, key)
    }

    pub fn count(&self, stage: Stage, state: StageState) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stage_records WHERE stage = ?1 AND state = ?2",
            params![stage.as_str(), state.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn read_state(conn: &Connection, stage: Stage, key: &str) -> Result<Option<StageState>> {
    let state: Option<String> = conn
        .query_row(
            "SELECT state FROM stage_records WHERE stage = ?1 AND key = ?2",
            params![stage.as_str(), key],
            |row| row.get(0),
        )
        .optional()?;

    state.map(|s| s.parse()).transpose()
}
