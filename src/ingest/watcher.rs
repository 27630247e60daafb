//! Watch directory poller.
//!
//! Picks up finished recordings from the watch directory and hands them to
//! the splitter. Each recording is claimed in the stage ledger before it is
//! split, so a restart never splits the same file twice.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ResolvedConfig;
use crate::core::{Stage, StageHandle, StageLedger};
use crate::domain::file_name_of;
use crate::error::{PipelineError, Result};

use super::readiness;
use super::splitter::ChunkSplitter;

/// Configuration for the recording watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory the recorder writes into
    pub watch_dir: PathBuf,

    /// Recording extensions to pick up
    pub extensions: Vec<String>,

    /// Time between directory scans
    pub poll_interval: Duration,

    /// Readiness quiescence interval
    pub quiescence: Duration,
}

impl WatcherConfig {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            watch_dir: config.paths.watch_dir.clone(),
            extensions: config.splitter.extensions.clone(),
            poll_interval: config.splitter.poll_interval(),
            quiescence: config.readiness.quiescence(),
        }
    }

    /// Check if the watch directory exists
    pub fn validate(&self) -> Result<()> {
        if !self.watch_dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "Watch directory does not exist: {}",
                self.watch_dir.display()
            )));
        }
        Ok(())
    }
}

/// Result of one directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Recordings split this cycle
    pub split: usize,

    /// Chunks written into staging this cycle
    pub chunks: usize,

    pub already_processed: usize,
    pub not_ready: usize,
    pub malformed: usize,
    pub failed: usize,
}

impl ScanResult {
    pub fn total_scanned(&self) -> usize {
        self.split + self.already_processed + self.not_ready + self.malformed + self.failed
    }
}

/// Polls the watch directory and splits every ready recording exactly once
pub struct RecordingWatcher {
    config: WatcherConfig,
    splitter: ChunkSplitter,
    stages: Arc<StageLedger>,
}

impl RecordingWatcher {
    pub fn new(config: WatcherConfig, splitter: ChunkSplitter, stages: Arc<StageLedger>) -> Self {
        Self {
            config,
            splitter,
            stages,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Drop split claims left behind by a run that died mid-split
    pub fn recover(&self) -> Result<usize> {
        let reset = self.stages.reset_incomplete(Stage::Split)?;
        if reset > 0 {
            tracing::info!("🔄 Reset {} interrupted split(s)", reset);
        }
        Ok(reset)
    }

    /// Scan the watch directory once
    pub async fn scan_once(&self) -> Result<ScanResult> {
        self.config.validate()?;

        let mut result = ScanResult::default();

        for path in self.candidates().await? {
            let key = file_name_of(&path);

            if self.stages.is_recorded(Stage::Split, &key)? {
                result.already_processed += 1;
                continue;
            }

            let recording = match readiness::check(&path, self.config.quiescence).await {
                Ok(recording) => recording,
                Err(e) => {
                    tracing::debug!("{} {}", e.marker(), e);
                    result.not_ready += 1;
                    continue;
                }
            };

            if !self.stages.claim(Stage::Split, &key)?.is_new() {
                result.already_processed += 1;
                continue;
            }

            match self.splitter.split(&recording).await {
                Ok(chunks) => {
                    self.stages.complete(Stage::Split, &key)?;
                    result.split += 1;
                    result.chunks += chunks.len();
                }
                Err(e @ PipelineError::MalformedFilename(_)) => {
                    // Renaming the file is the only fix; do not retry
                    tracing::warn!("{} {} (skipping {})", e.marker(), e, key);
                    self.stages.complete(Stage::Split, &key)?;
                    result.malformed += 1;
                }
                Err(e) => {
                    tracing::warn!("{} {}", e.marker(), e);
                    self.stages.release(Stage::Split, &key)?;
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }

    /// Run the poll loop in the background until stopped
    pub fn watch(self) -> Result<StageHandle> {
        self.config.validate()?;
        self.recover()?;

        Ok(StageHandle::spawn("recording watcher", move |mut signal| async move {
            tracing::info!("👀 Watching {} for recordings", self.config.watch_dir.display());

            loop {
                match self.scan_once().await {
                    Ok(scan) if scan.split > 0 || scan.failed > 0 => {
                        tracing::info!(
                            "Split {} recording(s) into {} chunk(s), {} failed",
                            scan.split,
                            scan.chunks,
                            scan.failed
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("{} Watch cycle failed: {}", e.marker(), e),
                }

                if signal.sleep(self.config.poll_interval).await {
                    break;
                }
            }
        }))
    }

    /// Regular, non-hidden files with a recording extension, in name order
    async fn candidates(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.watch_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if file_name_of(&path).starts_with('.') || !self.is_recording(&path) {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => paths.push(path),
                _ => continue,
            }
        }

        paths.sort();
        Ok(paths)
    }

    fn is_recording(&self, path: &Path) -> bool {
        has_extension(path, &self.config.extensions)
    }
}

/// Case-insensitive extension match
pub(crate) fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
