//! Error taxonomy for the ingestion pipeline.
//!
//! Every stage returns [`PipelineError`]. Loops never stop on a stage-local
//! error: they log it with the category marker and move on to the next file.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// File is still being written (or vanished between checks)
    #[error("Not ready yet: {0}")]
    NotReadyYet(PathBuf),

    /// Segmentation transform failed; the source is retried next cycle
    #[error("Split failed for {path}: {message}")]
    SplitFailed { path: PathBuf, message: String },

    /// Chunk name does not follow `<caller>_<uniqueId>_<index>.<ext>`
    #[error("Malformed chunk filename: {0}")]
    MalformedFilename(String),

    /// Transport error or non-200 response from the ingestion endpoint
    #[error("Delivery failed for {filename}: {reason}")]
    DeliveryFailed { filename: String, reason: String },

    /// Audio too short, unreadable, or rejected by the classifier
    #[error("Classification failed for {path}: {reason}")]
    ClassificationFailed { path: PathBuf, reason: String },

    /// External command (ffmpeg, classifier) ran past its deadline and was killed
    #[error("{what} timed out after {after:?}")]
    TimedOut { what: String, after: Duration },

    /// Ledger or results-log write failure
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Errors that resolve themselves on a later poll cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotReadyYet(_)
                | Self::SplitFailed { .. }
                | Self::DeliveryFailed { .. }
                | Self::TimedOut { .. }
        )
    }

    /// Log marker for the error category
    pub fn marker(&self) -> &'static str {
        match self {
            Self::NotReadyYet(_) => "⏳",
            Self::SplitFailed { .. } => "✂️",
            Self::MalformedFilename(_) => "⚠️",
            Self::DeliveryFailed { .. } => "❌",
            Self::ClassificationFailed { .. } => "🎭",
            Self::TimedOut { .. } => "⏱️",
            Self::PersistenceFailed(_) => "💾",
            Self::Config(_) => "⚙️",
            Self::Io(_) => "🔥",
        }
    }

    pub(crate) fn classification(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ClassificationFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::PersistenceFailed(format!("ledger: {}", e))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::PersistenceFailed(format!("serialization: {}", e))
    }
}
