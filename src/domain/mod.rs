//! Domain types for the call ingestion pipeline.
//!
//! - Chunk: recordings, chunk files and the canonical naming scheme
//! - Classification: ranked emotion predictions
//! - Delivery: ledger records and per-chunk delivery state

pub mod chunk;
pub mod classification;
pub mod delivery;

// Re-export commonly used types
pub use chunk::{file_name_of, Chunk, ChunkName, RecordingFile, INDEX_WIDTH};
pub use classification::{ClassificationResult, EmotionScore, LabelScore, DEFAULT_LABELS, TOP_K};
pub use delivery::{ChunkState, DeliveryRecord};
