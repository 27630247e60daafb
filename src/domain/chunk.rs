//! Recording and chunk types.
//!
//! Chunk files follow one canonical naming scheme:
//!
//! ```text
//! <caller>_<uniqueId>_<index>.<ext>      e.g. 5551234_1712345678.42_003.wav
//! ```
//!
//! The source recording is `<caller>_<uniqueId>.<ext>`; `index` is the
//! zero-based sequence number, zero-padded to [`INDEX_WIDTH`] digits.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Minimum number of digits in a chunk's sequence index
pub const INDEX_WIDTH: usize = 3;

/// Parsed chunk filename
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkName {
    /// Caller number or recorder token (first `_` token)
    pub caller: String,

    /// Recorder's unique id, usually a timestamp (may itself contain `_`)
    pub unique_id: String,

    /// Zero-based sequence index within the parent recording
    pub index: u32,

    /// File extension without the dot
    pub extension: String,
}

impl ChunkName {
    /// Parse a chunk filename (no directory components)
    pub fn parse(file_name: &str) -> Result<Self> {
        let malformed = || PipelineError::MalformedFilename(file_name.to_string());

        let (stem, extension) = file_name.rsplit_once('.').ok_or_else(malformed)?;
        if extension.is_empty() {
            return Err(malformed());
        }

        let tokens: Vec<&str> = stem.split('_').collect();
        let (index_token, head) = tokens.split_last().ok_or_else(malformed)?;
        if head.len() < 2 || index_token.is_empty() {
            return Err(malformed());
        }
        if !index_token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let index: u32 = index_token.parse().map_err(|_| malformed())?;

        // Only the canonical width, so the name formats back to itself
        if format!("{:0width$}", index, width = INDEX_WIDTH) != *index_token {
            return Err(malformed());
        }

        let caller = head[0];
        let unique_id = head[1..].join("_");
        if caller.is_empty() || unique_id.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            caller: caller.to_string(),
            unique_id,
            index,
            extension: extension.to_string(),
        })
    }

    /// Name for chunk `index` of the recording with stem `parent_stem`
    pub fn for_parent(parent_stem: &str, index: u32, extension: &str) -> Result<Self> {
        let name = format!("{}_{:0width$}.{}", parent_stem, index, extension, width = INDEX_WIDTH);
        Self::parse(&name)
    }

    /// `<caller>_<uniqueId>`, the stem of the parent recording
    pub fn parent_stem(&self) -> String {
        format!("{}_{}", self.caller, self.unique_id)
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{:0width$}.{}",
            self.parent_stem(),
            self.index,
            self.extension,
            width = INDEX_WIDTH
        )
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// A raw call recording observed in the watch directory
#[derive(Debug, Clone)]
pub struct RecordingFile {
    pub path: PathBuf,

    /// When the watcher first saw the file
    pub discovered_at: DateTime<Utc>,

    /// Size at the last readiness check
    pub size: u64,
}

impl RecordingFile {
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            discovered_at: Utc::now(),
            size,
        }
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }

    /// Stem shared by every chunk of this recording.
    ///
    /// Fails when the stem cannot produce parseable chunk names.
    pub fn chunk_stem(&self) -> Result<String> {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        ChunkName::for_parent(&stem, 0, "wav")?;
        Ok(stem)
    }
}

/// One fixed-duration segment of a recording
#[derive(Debug, Clone)]
pub struct Chunk {
    pub name: ChunkName,
    pub path: PathBuf,
    pub start_offset: Duration,
    pub duration: Duration,
}

impl Chunk {
    pub fn parent_stem(&self) -> String {
        self.name.parent_stem()
    }

    pub fn index(&self) -> u32 {
        self.name.index
    }
}

/// Lossy file name of a path, empty when it has none
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_name() {
        let name = ChunkName::parse("5551234_1712345678_007.wav").unwrap();
        assert_eq!(name.caller, "5551234");
        assert_eq!(name.unique_id, "1712345678");
        assert_eq!(name.index, 7);
        assert_eq!(name.extension, "wav");
        assert_eq!(name.parent_stem(), "5551234_1712345678");
    }

    #[test]
    fn test_unique_id_may_contain_underscores() {
        let name = ChunkName::parse("1000_2024-05-01_120000_012.wav").unwrap();
        assert_eq!(name.caller, "1000");
        assert_eq!(name.unique_id, "2024-05-01_120000");
        assert_eq!(name.index, 12);
        assert_eq!(name.file_name(), "1000_2024-05-01_120000_012.wav");
    }

    #[test]
    fn test_malformed_names_rejected() {
        for bad in [
            "recording.wav",
            "caller_000.wav",
            "a_b_c.wav",
            "a_b_.wav",
            "_b_001.wav",
            "a_b_001",
            "a_b_001.",
            "100_1_7.wav",
            "100_1_07.wav",
            "100_1_0007.wav",
        ] {
            assert!(
                matches!(ChunkName::parse(bad), Err(PipelineError::MalformedFilename(_))),
                "{} should be malformed",
                bad
            );
        }
    }

    #[test]
    fn test_parse_then_format_round_trips() {
        for name in [
            "100_1_000.wav",
            "100_1_007.wav",
            "5551234_1712345678.42_999.wav",
            "42_abc_1234.flac",
        ] {
            assert_eq!(ChunkName::parse(name).unwrap().file_name(), name);
        }
    }

    #[test]
    fn test_index_is_zero_padded() {
        let name = ChunkName::for_parent("42_abc", 3, "wav").unwrap();
        assert_eq!(name.to_string(), "42_abc_003.wav");

        let wide = ChunkName::for_parent("42_abc", 1234, "wav").unwrap();
        assert_eq!(wide.to_string(), "42_abc_1234.wav");
    }

    #[test]
    fn test_recording_chunk_stem() {
        let ok = RecordingFile::new(PathBuf::from("/calls/5551234_1712345678.wav"), 10);
        assert_eq!(ok.chunk_stem().unwrap(), "5551234_1712345678");

        let bad = RecordingFile::new(PathBuf::from("/calls/untitled.wav"), 10);
        assert!(bad.chunk_stem().is_err());
    }
}
