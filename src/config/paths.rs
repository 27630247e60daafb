//! Canonical default paths for the callwatch pipeline.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Layout
//!
//! | Location | Owner | Purpose |
//! |----------|-------|---------|
//! | `livecalls/` | Call recorder | Raw recordings (read-only for the pipeline) |
//! | `chunks/` | Splitter → Delivery worker | Chunks pending delivery |
//! | `sentchunks/` | Delivery worker | Delivered chunks (move mode) |
//! | `received_audio/` | Ingestion endpoint | Accepted chunks, watched for classification |
//! | `emotion_results.jsonl` | Classification monitor | Append-only results log |
//! | `sent_chunks.db` | Delivery worker | Dedup ledger |
//! | `stages.db` | Splitter, monitor | Per-stage processed records |

use std::path::{Path, PathBuf};

pub fn watch_dir(home: &Path) -> PathBuf {
    home.join("livecalls")
}

pub fn staging_dir(home: &Path) -> PathBuf {
    home.join("chunks")
}

pub fn sent_dir(home: &Path) -> PathBuf {
    home.join("sentchunks")
}

pub fn receive_dir(home: &Path) -> PathBuf {
    home.join("received_audio")
}

pub fn results_log(home: &Path) -> PathBuf {
    home.join("emotion_results.jsonl")
}

pub fn ledger_db(home: &Path) -> PathBuf {
    home.join("sent_chunks.db")
}

pub fn stage_db(home: &Path) -> PathBuf {
    home.join("stages.db")
}
