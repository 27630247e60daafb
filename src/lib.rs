//! callwatch - call recording ingestion and emotion classification
//!
//! Recordings land in a watch directory, are split into fixed-length
//! chunks and delivered to an ingestion endpoint. A persistent ledger keeps
//! a confirmed chunk from being sent again, and every received chunk is
//! classified for speech emotion.
//!
//! # Architecture
//!
//! ```text
//! livecalls/ → RecordingWatcher → chunks/ → DeliveryWorker → POST /receive_audio
//!                                                                  ↓
//!   results consumer ← ResultPublisher ← ClassificationMonitor ← received_audio/
//! ```
//!
//! # Modules
//!
//! - `ingest`: Readiness detection, chunk splitting, watch directory polling
//! - `delivery`: Staging poller and uploader
//! - `classify`: Waveform loading, classifier boundary, receive directory monitor
//! - `adapters`: HTTP clients (ingestion endpoint, results consumer)
//! - `core`: Ledgers, results log, backoff, stage handles
//! - `domain`: Data structures (ChunkName, ClassificationResult, ...)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run every stage until Ctrl+C
//! callwatch run
//!
//! # Deliver whatever is staged right now
//! callwatch deliver --once
//!
//! # Export results for the dashboard
//! callwatch results --export emotion_results.json
//! ```

pub mod adapters;
pub mod classify;
pub mod cli;
pub mod config;
pub mod core;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use classify::{ClassificationMonitor, Classifier, CommandClassifier};
pub use core::{DedupLedger, ResultsLog, StageHandle, StageLedger};
pub use delivery::{DeliveryMode, DeliveryWorker};
pub use domain::{Chunk, ChunkName, ClassificationResult, RecordingFile};
pub use error::{PipelineError, Result};
pub use ingest::{ChunkSplitter, RecordingWatcher};
