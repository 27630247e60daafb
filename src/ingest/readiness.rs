//! File readiness detection.
//!
//! A recording is ready when two size checks separated by a quiescence
//! interval agree. No cooperation from the writer is needed.

use std::path::Path;
use std::time::Duration;

use crate::domain::RecordingFile;
use crate::error::{PipelineError, Result};

/// Size of `path` if it is a non-empty regular file
async fn regular_file_size(path: &Path) -> Option<u64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    if metadata.is_file() {
        Some(metadata.len())
    } else {
        None
    }
}

/// Check readiness, returning the observed recording on success
pub async fn check(path: &Path, quiescence: Duration) -> Result<RecordingFile> {
    let not_ready = || PipelineError::NotReadyYet(path.to_path_buf());

    let first = regular_file_size(path).await.ok_or_else(not_ready)?;
    tokio::time::sleep(quiescence).await;
    let second = regular_file_size(path).await.ok_or_else(not_ready)?;

    if first != second || second == 0 {
        return Err(not_ready());
    }

    Ok(RecordingFile::new(path.to_path_buf(), second))
}

/// Whether `path` is a stable, fully written file. Never fails.
pub async fn is_ready(path: &Path, quiescence: Duration) -> bool {
    check(path, quiescence).await.is_ok()
}
