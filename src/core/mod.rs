//! Shared pipeline machinery.
//!
//! This module contains:
//! - DedupLedger: durable record of delivered chunks
//! - StageLedger: durable per-stage processed records
//! - ResultsLog: append-only classification results
//! - Backoff: capped exponential retry delays
//! - StageHandle: stop signalling for long-running loops

pub mod backoff;
pub mod handle;
pub mod ledger;
pub mod results_log;
pub mod stage_ledger;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, BackoffTracker};
pub use handle::{shutdown_channel, ShutdownSignal, StageHandle};
pub use ledger::{DedupLedger, MarkResult};
pub use results_log::ResultsLog;
pub use stage_ledger::{ClaimResult, Stage, StageLedger, StageState};
