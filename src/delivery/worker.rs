//! Staging directory poller and uploader.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::DeliveryMode;
use crate::adapters::ChunkSink;
use crate::config::ResolvedConfig;
use crate::core::{BackoffPolicy, BackoffTracker, DedupLedger, StageHandle};
use crate::domain::{file_name_of, ChunkName, ChunkState};
use crate::error::Result;
use crate::ingest::watcher::has_extension;

/// Configuration for the delivery worker
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub staging_dir: PathBuf,
    pub sent_dir: PathBuf,
    pub extensions: Vec<String>,
    pub poll_interval: Duration,
    pub mode: DeliveryMode,
    pub backoff: BackoffPolicy,
}

impl DeliveryConfig {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            staging_dir: config.paths.staging_dir.clone(),
            sent_dir: config.paths.sent_dir.clone(),
            extensions: config.delivery.extensions.clone(),
            poll_interval: config.delivery.poll_interval(),
            mode: config.delivery.mode,
            backoff: config.delivery.backoff.clone(),
        }
    }
}

/// Summary of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryCycle {
    /// Confirmed by the endpoint this cycle
    pub delivered: usize,

    /// Already in the ledger
    pub already_sent: usize,

    /// Name does not parse; skipped
    pub malformed: usize,

    /// Attempted and failed; left in staging
    pub failed: usize,

    /// Waiting out a backoff delay
    pub deferred: usize,

    /// Ledger lookup failed; left for the next cycle
    pub unchecked: usize,
}

impl DeliveryCycle {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Delivers staged chunks exactly once (at least once across crashes)
pub struct DeliveryWorker {
    config: DeliveryConfig,
    ledger: Arc<DedupLedger>,
    sink: Arc<dyn ChunkSink>,
    backoff: BackoffTracker,
    /// Malformed names already reported
    warned: HashSet<String>,
}

impl DeliveryWorker {
    pub fn new(config: DeliveryConfig, ledger: Arc<DedupLedger>, sink: Arc<dyn ChunkSink>) -> Self {
        let backoff = BackoffTracker::new(config.backoff.clone());
        Self {
            config,
            ledger,
            sink,
            backoff,
            warned: HashSet::new(),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Current delivery state of a chunk by filename
    pub fn state_of(&self, filename: &str) -> Result<ChunkState> {
        if self.ledger.is_sent(filename)? || self.config.sent_dir.join(filename).is_file() {
            Ok(ChunkState::Sent)
        } else {
            Ok(ChunkState::Staged)
        }
    }

    /// Run one poll cycle over the staging directory
    pub async fn poll_once(&mut self) -> Result<DeliveryCycle> {
        let mut cycle = DeliveryCycle::default();
        let staged = self.staged_chunks().await?;
        let present: HashSet<String> = staged.iter().map(|p| file_name_of(p)).collect();

        for path in staged {
            let filename = file_name_of(&path);

            match self.ledger.is_sent(&filename) {
                Ok(true) => {
                    cycle.already_sent += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("{} Could not check {}: {} (skipping)", e.marker(), filename, e);
                    cycle.unchecked += 1;
                    continue;
                }
            }

            let chunk = match ChunkName::parse(&filename) {
                Ok(chunk) => chunk,
                Err(e) => {
                    if self.warned.insert(filename.clone()) {
                        tracing::warn!("{} {} (skipping)", e.marker(), e);
                    }
                    cycle.malformed += 1;
                    continue;
                }
            };

            if !self.backoff.ready(&filename, Instant::now()) {
                cycle.deferred += 1;
                continue;
            }

            tracing::debug!("{}: {} → {}", filename, ChunkState::Staged, ChunkState::Delivering);

            match self.sink.deliver(&path, &chunk).await {
                Ok(()) => {
                    self.backoff.record_success(&filename);
                    self.record_sent(&path, &filename).await;
                    tracing::info!("✅ Sent {}", filename);
                    cycle.delivered += 1;
                }
                Err(e) => {
                    let delay = self.backoff.record_failure(&filename, Instant::now());
                    tracing::warn!(
                        "{} {} ({} → {}, attempt {}, next try in {:?})",
                        e.marker(),
                        e,
                        ChunkState::Delivering,
                        ChunkState::Staged,
                        self.backoff.failures(&filename),
                        delay
                    );
                    cycle.failed += 1;
                }
            }
        }

        self.backoff.retain_keys(&present);
        Ok(cycle)
    }

    /// Run the poll loop in the background until stopped
    pub fn spawn(mut self) -> StageHandle {
        StageHandle::spawn("delivery worker", move |mut signal| async move {
            tracing::info!(
                "🚀 Delivering chunks from {} via {} ({} mode)",
                self.config.staging_dir.display(),
                self.sink.name(),
                self.config.mode
            );

            loop {
                match self.poll_once().await {
                    Ok(cycle) if cycle.attempted() > 0 => {
                        tracing::debug!(
                            "Delivery cycle: {} sent, {} failed, {} deferred",
                            cycle.delivered,
                            cycle.failed,
                            cycle.deferred
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("{} Delivery cycle failed: {}", e.marker(), e),
                }

                if signal.sleep(self.config.poll_interval).await {
                    break;
                }
            }
        })
    }

    /// Record a confirmed chunk according to the delivery mode.
    ///
    /// A failure here means the chunk may be delivered again after a
    /// restart; it is logged, not retried.
    async fn record_sent(&self, path: &Path, filename: &str) {
        let mode = self.config.mode;

        if mode.records_in_ledger() {
            match self.ledger.mark_sent(filename) {
                Ok(mark) if !mark.is_new() => {
                    tracing::debug!("{} was already recorded by another worker", filename)
                }
                Ok(_) => {}
                Err(e) => tracing::error!("{} Could not record {}: {}", e.marker(), filename, e),
            }
        }

        if mode.moves_file() {
            let dest = self.config.sent_dir.join(filename);
            let moved = match tokio::fs::create_dir_all(&self.config.sent_dir).await {
                Ok(()) => tokio::fs::rename(path, &dest).await,
                Err(e) => Err(e),
            };
            if let Err(e) = moved {
                tracing::error!("💾 Could not move {} to {}: {}", filename, dest.display(), e);
            }
        }
    }

    /// Regular, non-hidden chunk files in staging, in name order
    async fn staged_chunks(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if !self.config.staging_dir.is_dir() {
            return Ok(paths);
        }

        let mut entries = tokio::fs::read_dir(&self.config.staging_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if file_name_of(&path).starts_with('.') || !has_extension(&path, &self.config.extensions) {
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
}
