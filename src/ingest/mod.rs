//! Recording ingestion: watch directory → staging.
//!
//! 1. **Watcher**: polls the watch directory for recordings
//! 2. **Readiness**: two size checks separated by a quiescence interval
//! 3. **Splitter**: fixed-duration chunks, copied into staging
//!
//! ```text
//! recorder → livecalls/ → Watcher → Readiness → Splitter → chunks/
//!                            ↓
//!                       stages.db (split claims)
//! ```

pub mod readiness;
pub mod splitter;
pub mod watcher;

// Re-export key types
pub use readiness::{check, is_ready};
pub use splitter::{ChunkSplitter, FfmpegSegmenter, SegmenterKind, Segmenter, WavSegmenter};
pub use watcher::{RecordingWatcher, ScanResult, WatcherConfig};
