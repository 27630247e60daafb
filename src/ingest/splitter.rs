//! Fixed-duration chunk splitting.
//!
//! Segments are copy-split (no re-encoding) into a hidden scratch directory
//! inside staging, then renamed into staging in index order. The delivery
//! worker only looks at regular files in staging, so it never sees a
//! half-written chunk. The source recording is never modified.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::SplitterSettings;
use crate::domain::{file_name_of, Chunk, ChunkName, RecordingFile, INDEX_WIDTH};
use crate::error::{PipelineError, Result};

/// Default bound on a single ffmpeg run
pub const DEFAULT_FFMPEG_TIMEOUT: Duration = Duration::from_secs(300);

/// Which segmentation backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmenterKind {
    /// External `ffmpeg -f segment -c copy`
    #[default]
    Ffmpeg,

    /// In-process PCM WAV copy-split
    Native,
}

/// Fixed-interval segmentation transform
#[async_trait]
pub trait Segmenter: Send + Sync {
    fn name(&self) -> &str;

    /// Write `<stem>_<NNN>.<ext>` segments of `source` into `out_dir`.
    ///
    /// Returns the total source duration when the backend reports one.
    async fn segment(&self, source: &Path, stem: &str, chunk: Duration, out_dir: &Path) -> Result<Option<Duration>>;
}

/// Segmenter backed by the ffmpeg segment muxer
pub struct FfmpegSegmenter {
    program: String,
    timeout: Duration,
}

impl FfmpegSegmenter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_FFMPEG_TIMEOUT,
        }
    }

    /// Kill ffmpeg if a split runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Segmenter for FfmpegSegmenter {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn segment(&self, source: &Path, stem: &str, chunk: Duration, out_dir: &Path) -> Result<Option<Duration>> {
        let pattern = out_dir.join(format!(
            "{}_%0{}d.{}",
            stem,
            INDEX_WIDTH,
            extension_of(source)
        ));

        let run = Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-f")
            .arg("segment")
            .arg("-segment_time")
            .arg(format!("{:.3}", chunk.as_secs_f64()))
            .arg("-c")
            .arg("copy")
            .arg("-reset_timestamps")
            .arg("1")
            .arg(&pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = timeout(self.timeout, run)
            .await
            .map_err(|_| split_failed(source, format!("{} timed out after {:?}", self.program, self.timeout)))?
            .map_err(|e| split_failed(source, format!("Failed to run {}: {}", self.program, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(split_failed(
                source,
                format!("{} exited with {}: {}", self.program, output.status, tail.join(" | ")),
            ));
        }

        Ok(parse_ffmpeg_duration(&stderr))
    }
}

/// Input duration from ffmpeg's `Duration: HH:MM:SS.ss` banner line
fn parse_ffmpeg_duration(stderr: &str) -> Option<Duration> {
    let rest = stderr.split("Duration:").nth(1)?;
    let stamp = rest.trim_start().split(|c: char| c == ',' || c.is_whitespace()).next()?;

    let mut parts = stamp.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}

/// Sample-exact copy-split of PCM WAV files
pub struct WavSegmenter;

#[async_trait]
impl Segmenter for WavSegmenter {
    fn name(&self) -> &str {
        "native"
    }

    async fn segment(&self, source: &Path, stem: &str, chunk: Duration, out_dir: &Path) -> Result<Option<Duration>> {
        let source = source.to_path_buf();
        let stem = stem.to_string();
        let out_dir = out_dir.to_path_buf();

        let written = tokio::task::spawn_blocking({
            let source = source.clone();
            move || segment_wav(&source, &stem, chunk, &out_dir)
        })
        .await
        .map_err(|e| split_failed(&source, format!("segmenter task failed: {}", e)))?
        .map_err(|e| split_failed(&source, e.to_string()))?;

        tracing::debug!("Wrote {} native segment(s) for {}", written, source.display());
        Ok(wav_duration(&source))
    }
}

fn segment_wav(source: &Path, stem: &str, chunk: Duration, out_dir: &Path) -> hound::Result<usize> {
    let mut reader = WavReader::open(source)?;
    let spec = reader.spec();

    let frames_per_chunk = (spec.sample_rate as u128 * chunk.as_millis() / 1000).max(1) as u64;
    let samples_per_chunk = frames_per_chunk * spec.channels as u64;
    let target = SegmentTarget {
        spec,
        samples_per_chunk,
        stem,
        extension: "wav",
        out_dir,
    };

    match spec.sample_format {
        SampleFormat::Int => target.write(reader.samples::<i32>()),
        SampleFormat::Float => target.write(reader.samples::<f32>()),
    }
}

struct SegmentTarget<'a> {
    spec: WavSpec,
    samples_per_chunk: u64,
    stem: &'a str,
    extension: &'a str,
    out_dir: &'a Path,
}

impl SegmentTarget<'_> {
    /// Copy samples into consecutive segment files; returns the segment count
    fn write<S, I>(&self, samples: I) -> hound::Result<usize>
    where
        S: hound::Sample,
        I: Iterator<Item = hound::Result<S>>,
    {
        let mut index = 0usize;
        let mut written = 0u64;
        let mut writer: Option<WavWriter<BufWriter<File>>> = None;

        for sample in samples {
            let sample = sample?;
            let w = match writer.as_mut() {
                Some(w) => w,
                None => {
                    let path = self.out_dir.join(segment_file_name(self.stem, index, self.extension));
                    writer.insert(WavWriter::create(path, self.spec)?)
                }
            };
            w.write_sample(sample)?;
            written += 1;

            if written == self.samples_per_chunk {
                if let Some(w) = writer.take() {
                    w.finalize()?;
                }
                written = 0;
                index += 1;
            }
        }

        if let Some(w) = writer.take() {
            w.finalize()?;
            index += 1;
        }

        Ok(index)
    }
}

/// Splits ready recordings into deterministically named chunks in staging
pub struct ChunkSplitter {
    staging_dir: PathBuf,
    chunk_duration: Duration,
    segmenter: Box<dyn Segmenter>,
}

impl ChunkSplitter {
    pub fn new(staging_dir: PathBuf, chunk_duration: Duration, segmenter: Box<dyn Segmenter>) -> Self {
        Self {
            staging_dir,
            chunk_duration,
            segmenter,
        }
    }

    pub fn from_settings(settings: &SplitterSettings, staging_dir: PathBuf) -> Self {
        let segmenter: Box<dyn Segmenter> = match settings.segmenter {
            SegmenterKind::Ffmpeg => Box::new(
                FfmpegSegmenter::new(settings.ffmpeg_path.clone()).with_timeout(settings.ffmpeg_timeout()),
            ),
            SegmenterKind::Native => Box::new(WavSegmenter),
        };
        Self::new(staging_dir, settings.chunk_duration(), segmenter)
    }

    pub fn chunk_duration(&self) -> Duration {
        self.chunk_duration
    }

    /// Split `recording` into staging; returns chunks in sequence order
    pub async fn split(&self, recording: &RecordingFile) -> Result<Vec<Chunk>> {
        let source = &recording.path;
        let stem = recording.chunk_stem()?;

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(".split-")
            .tempdir_in(&self.staging_dir)
            .map_err(|e| split_failed(source, format!("scratch directory: {}", e)))?;

        let total = self
            .segmenter
            .segment(source, &stem, self.chunk_duration, scratch.path())
            .await?;

        let segments = collect_segments(scratch.path(), &stem).await?;
        if segments.is_empty() {
            return Err(split_failed(source, "segmenter produced no chunks"));
        }
        for (expected, (name, _)) in segments.iter().enumerate() {
            if name.index as usize != expected {
                return Err(split_failed(
                    source,
                    format!("chunk indices not contiguous at {}", name),
                ));
            }
        }

        let last = segments.len() - 1;
        let mut chunks = Vec::with_capacity(segments.len());
        for (name, scratch_path) in segments {
            let start_offset = self.chunk_duration * name.index;
            let duration = wav_duration(&scratch_path).unwrap_or_else(|| {
                if name.index as usize == last {
                    final_chunk_duration(total, start_offset, self.chunk_duration)
                } else {
                    self.chunk_duration
                }
            });
            let dest = self.staging_dir.join(name.file_name());
            tokio::fs::rename(&scratch_path, &dest)
                .await
                .map_err(|e| split_failed(source, format!("move {} into staging: {}", name, e)))?;

            chunks.push(Chunk {
                start_offset,
                duration,
                path: dest,
                name,
            });
        }

        tracing::info!(
            "✂️ Split {} into {} chunk(s) with {}",
            recording.file_name(),
            chunks.len(),
            self.segmenter.name()
        );
        Ok(chunks)
    }
}

/// Segments belonging to `stem` in `dir`, sorted by index
async fn collect_segments(dir: &Path, stem: &str) -> Result<Vec<(ChunkName, PathBuf)>> {
    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Ok(name) = ChunkName::parse(&file_name_of(&path)) else {
            continue;
        };
        if name.parent_stem() == stem {
            segments.push((name, path));
        }
    }

    segments.sort_by_key(|(name, _)| name.index);
    Ok(segments)
}

/// Remainder of the source after `start_offset`, capped at one chunk
fn final_chunk_duration(total: Option<Duration>, start_offset: Duration, chunk: Duration) -> Duration {
    match total.map(|t| t.saturating_sub(start_offset)) {
        Some(rest) if !rest.is_zero() => rest.min(chunk),
        _ => chunk,
    }
}

fn segment_file_name(stem: &str, index: usize, extension: &str) -> String {
    format!("{}_{:0width$}.{}", stem, index, extension, width = INDEX_WIDTH)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "wav".to_string())
}

/// Duration from a WAV header, `None` for other containers
pub fn wav_duration(path: &Path) -> Option<Duration> {
    let reader = WavReader::open(path).ok()?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(reader.duration() as f64 / rate as f64))
}

fn split_failed(path: &Path, message: impl Into<String>) -> PipelineError {
    PipelineError::SplitFailed {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_tone(path: &Path, seconds: u32, sample_rate: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..(seconds * sample_rate) {
            writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_segment_file_name_padding() {
        assert_eq!(segment_file_name("1_2", 0, "wav"), "1_2_000.wav");
        assert_eq!(segment_file_name("1_2", 42, "wav"), "1_2_042.wav");
    }

    #[test]
    fn test_parse_ffmpeg_duration() {
        let banner = "Input #0, mp3, from 'call.mp3':\n  Duration: 00:00:47.52, start: 0.025057, bitrate: 128 kb/s\n";
        assert_eq!(parse_ffmpeg_duration(banner), Some(Duration::from_millis(47_520)));
        assert_eq!(
            parse_ffmpeg_duration("  Duration: 01:02:03.50, bitrate: N/A"),
            Some(Duration::from_secs(3723) + Duration::from_millis(500))
        );
        assert_eq!(parse_ffmpeg_duration("  Duration: N/A, bitrate: N/A"), None);
        assert_eq!(parse_ffmpeg_duration("no banner here"), None);
    }

    #[test]
    fn test_final_chunk_duration_is_remainder() {
        let chunk = Duration::from_secs(15);
        let total = Some(Duration::from_millis(47_520));

        assert_eq!(
            final_chunk_duration(total, Duration::from_secs(45), chunk),
            Duration::from_millis(2520)
        );
        assert_eq!(final_chunk_duration(None, Duration::from_secs(45), chunk), chunk);
        // Reported total shorter than the offset falls back to a full chunk
        assert_eq!(
            final_chunk_duration(Some(Duration::from_secs(40)), Duration::from_secs(45), chunk),
            chunk
        );
    }

    #[tokio::test]
    async fn test_native_split_keeps_samples() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("5551234_1712345678.wav");
        write_tone(&source, 5, 8000);

        let staging = temp.path().join("staging");
        let splitter = ChunkSplitter::new(staging.clone(), Duration::from_secs(2), Box::new(WavSegmenter));
        let recording = RecordingFile::new(source.clone(), 0);

        let chunks = splitter.split(&recording).await.unwrap();
        let names: Vec<String> = chunks.iter().map(|c| c.name.file_name()).collect();
        assert_eq!(
            names,
            vec![
                "5551234_1712345678_000.wav",
                "5551234_1712345678_001.wav",
                "5551234_1712345678_002.wav",
            ]
        );
        assert_eq!(chunks[2].duration, Duration::from_secs(1));
        assert_eq!(chunks[2].start_offset, Duration::from_secs(4));

        // Samples are copied, not re-encoded
        let total: u32 = chunks
            .iter()
            .map(|c| WavReader::open(&c.path).unwrap().duration())
            .sum();
        assert_eq!(total, 5 * 8000);

        // Source untouched, no scratch directory left behind
        assert!(source.exists());
        let leftovers: Vec<_> = std::fs::read_dir(&staging)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_source_fails() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("1000_1712.wav");
        tokio::fs::write(&source, b"not a wav file").await.unwrap();

        let splitter = ChunkSplitter::new(temp.path().join("staging"), Duration::from_secs(15), Box::new(WavSegmenter));
        let err = splitter
            .split(&RecordingFile::new(source.clone(), 14))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SplitFailed { .. }));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_split_failure() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("1000_1712.wav");
        write_tone(&source, 1, 8000);

        let splitter = ChunkSplitter::new(
            temp.path().join("staging"),
            Duration::from_secs(15),
            Box::new(FfmpegSegmenter::new("/nonexistent/ffmpeg-binary")),
        );
        let err = splitter.split(&RecordingFile::new(source, 0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::SplitFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_ffmpeg_is_killed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let source = temp.path().join("1000_1712.wav");
        write_tone(&source, 1, 8000);

        let fake = temp.path().join("fake-ffmpeg");
        std::fs::write(&fake, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let splitter = ChunkSplitter::new(
            temp.path().join("staging"),
            Duration::from_secs(15),
            Box::new(FfmpegSegmenter::new(fake.to_string_lossy()).with_timeout(Duration::from_millis(200))),
        );

        let started = std::time::Instant::now();
        let err = splitter.split(&RecordingFile::new(source, 0)).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.is_transient());
        match err {
            PipelineError::SplitFailed { message, .. } => assert!(message.contains("timed out"), "{}", message),
            other => panic!("expected split failure, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_badly_named_recording_is_malformed() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("untitled.wav");
        write_tone(&source, 1, 8000);

        let splitter = ChunkSplitter::new(temp.path().join("staging"), Duration::from_secs(15), Box::new(WavSegmenter));
        let err = splitter.split(&RecordingFile::new(source, 0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFilename(_)));
    }
}
