//! Chunk delivery: staging → ingestion endpoint.
//!
//! The worker polls the staging directory, uploads every chunk the dedup
//! ledger has not seen, and records confirmed chunks. Failed uploads stay in
//! staging and are retried with capped exponential backoff.

pub mod worker;

use serde::{Deserialize, Serialize};

pub use worker::{DeliveryConfig, DeliveryCycle, DeliveryWorker};

/// How a confirmed chunk is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Insert into the dedup ledger; the file stays in staging
    #[default]
    Ledger,

    /// Rename into the sent directory
    Move,

    /// Ledger first, then rename
    Both,
}

impl DeliveryMode {
    pub fn records_in_ledger(self) -> bool {
        matches!(self, Self::Ledger | Self::Both)
    }

    pub fn moves_file(self) -> bool {
        matches!(self, Self::Move | Self::Both)
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ledger => "ledger",
            Self::Move => "move",
            Self::Both => "both",
        };
        write!(f, "{}", s)
    }
}
