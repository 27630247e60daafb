//! Delivery bookkeeping types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chunk confirmed by the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Chunk filename (globally unique by the naming scheme)
    pub filename: String,

    pub sent_at: DateTime<Utc>,
}

/// Delivery state of one staged chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    /// Waiting in staging (initial, and after a failed attempt)
    Staged,

    /// Upload in flight
    Delivering,

    /// Confirmed by the endpoint (terminal)
    Sent,
}

impl ChunkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent)
    }
}

impl std::fmt::Display for ChunkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Staged => "staged",
            Self::Delivering => "delivering",
            Self::Sent => "sent",
        };
        write!(f, "{}", s)
    }
}
