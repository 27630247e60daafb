//! Append-only classification results log.
//!
//! One JSON object per line. Every append holds an exclusive lock on the file
//! for the duration of the write, so several monitors may share one log.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::domain::ClassificationResult;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one result under an exclusive lock
    pub fn append(&self, result: &ClassificationResult) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| persist("create log directory", e))?;
        }

        let json = serde_json::to_string(result)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| persist("open results log", e))?;

        file.lock_exclusive()
            .map_err(|e| persist("lock results log", e))?;

        writeln!(file, "{}", json).map_err(|e| persist("write result", e))?;
        file.flush().map_err(|e| persist("flush result", e))?;

        // Lock is released when file is dropped
        Ok(())
    }

    /// Replay every result in append order.
    ///
    /// A torn final line (crash mid-write) is skipped.
    pub fn read_all(&self) -> Result<Vec<ClassificationResult>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).map_err(|e| persist("open results log", e))?;
        file.lock_shared()
            .map_err(|e| persist("lock results log", e))?;

        let mut results = Vec::new();
        for line in BufReader::new(&file).lines() {
            let line = line.map_err(|e| persist("read results log", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ClassificationResult>(&line) {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!("Skipping unreadable result line in {}: {}", self.path.display(), e),
            }
        }

        Ok(results)
    }

    /// Write the whole log as one pretty-printed JSON array; returns the entry count
    pub fn export_json(&self, dest: &Path) -> Result<usize> {
        let results = self.read_all()?;
        let json = serde_json::to_string_pretty(&results)?;

        let tmp = dest.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| persist("write export", e))?;
        std::fs::rename(&tmp, dest).map_err(|e| persist("rename export", e))?;

        Ok(results.len())
    }
}

fn persist(action: &str, e: std::io::Error) -> PipelineError {
    PipelineError::PersistenceFailed(format!("{}: {}", action, e))
}
