//! Receive directory monitor.
//!
//! Filesystem events for new audio files are queued to a single inference
//! worker, so at most one classification runs at a time. Each path is
//! claimed in the stage ledger before any work starts and stays claimed
//! whatever the outcome, except when a command timed out: that claim is
//! released so the next sweep tries the file again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::classifier::{Classifier, ClassifierError};
use super::waveform::WaveformLoader;
use crate::adapters::ResultSink;
use crate::config::ResolvedConfig;
use crate::core::{ResultsLog, ShutdownSignal, Stage, StageHandle, StageLedger};
use crate::domain::{file_name_of, ClassificationResult};
use crate::error::{PipelineError, Result};
use crate::ingest::watcher::has_extension;

/// Configuration for the classification monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory tree to watch
    pub receive_dir: PathBuf,

    /// Audio extensions to classify
    pub extensions: Vec<String>,

    /// Wait between the event and reading the file
    pub settle: Duration,

    /// Predictions kept per result
    pub top_k: usize,
}

impl MonitorConfig {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            receive_dir: config.paths.receive_dir.clone(),
            extensions: config.monitor.extensions.clone(),
            settle: config.monitor.settle(),
            top_k: config.monitor.top_k,
        }
    }
}

/// Result of sweeping existing files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub classified: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Classifies every new audio file in the receive directory once
pub struct ClassificationMonitor {
    config: MonitorConfig,
    stages: Arc<StageLedger>,
    loader: WaveformLoader,
    classifier: Arc<dyn Classifier>,
    results: ResultsLog,
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl ClassificationMonitor {
    pub fn new(
        config: MonitorConfig,
        stages: Arc<StageLedger>,
        loader: WaveformLoader,
        classifier: Arc<dyn Classifier>,
        results: ResultsLog,
    ) -> Self {
        Self {
            config,
            stages,
            loader,
            classifier,
            results,
            sinks: Vec::new(),
        }
    }

    /// Add a consumer notified after each successful classification
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Classify `path` unless it was already claimed.
    ///
    /// Returns `Ok(None)` for skipped paths. A classification error leaves
    /// the path marked processed; a transient one (timeout) releases it.
    pub async fn process_file(&self, path: &Path) -> Result<Option<ClassificationResult>> {
        if !has_extension(path, &self.config.extensions) || file_name_of(path).starts_with('.') {
            return Ok(None);
        }

        let key = claim_key(path);
        if !self.stages.claim(Stage::Classify, &key)?.is_new() {
            tracing::debug!("Already processed {}", key);
            return Ok(None);
        }

        tracing::info!("🎵 New audio file detected: {}", file_name_of(path));
        tokio::time::sleep(self.config.settle).await;

        let outcome = self.classify(path).await;
        match &outcome {
            Err(e) if e.is_transient() => self.stages.release(Stage::Classify, &key)?,
            _ => self.stages.complete(Stage::Classify, &key)?,
        }
        let result = outcome?;

        if let Err(e) = self.results.append(&result) {
            tracing::error!("{} Could not save result for {}: {}", e.marker(), result.file_name(), e);
        }

        for sink in &self.sinks {
            if let Err(e) = sink.publish(&result).await {
                tracing::warn!("{} {} rejected {}: {}", e.marker(), sink.name(), result.file_name(), e);
            }
        }

        Ok(Some(result))
    }

    /// Classify every matching file already under the receive directory
    pub async fn process_existing(&self) -> Result<SweepResult> {
        self.sweep(&ShutdownSignal::never()).await
    }

    /// Start the event watch and inference worker
    pub fn watch(self, sweep_existing: bool) -> Result<StageHandle> {
        let dir = self.config.receive_dir.clone();
        std::fs::create_dir_all(&dir)?;

        if self.stages.is_durable() {
            let reset = self.stages.reset_incomplete(Stage::Classify)?;
            if reset > 0 {
                tracing::info!("🔄 Reset {} interrupted classification(s)", reset);
            }
        }

        // Single consumer: the worker below is the only reader
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in event_paths(&event) {
                    let _ = tx.send(path);
                }
            }
            Err(e) => tracing::warn!("Watch error: {}", e),
        })
        .map_err(|e| PipelineError::Config(format!("Failed to start watcher: {}", e)))?;

        watcher
            .watch(&dir, RecursiveMode::Recursive)
            .map_err(|e| PipelineError::Config(format!("Failed to watch {}: {}", dir.display(), e)))?;

        Ok(StageHandle::spawn("classification monitor", move |mut signal| async move {
            let _watcher = watcher;
            tracing::info!("🔍 Monitoring {}", dir.display());

            if sweep_existing {
                match self.sweep(&signal).await {
                    Ok(sweep) => tracing::info!(
                        "Existing files: {} classified, {} skipped, {} failed",
                        sweep.classified,
                        sweep.skipped,
                        sweep.failed
                    ),
                    Err(e) => tracing::warn!("{} Sweep failed: {}", e.marker(), e),
                }
            }

            loop {
                let next = tokio::select! {
                    _ = signal.stopped() => break,
                    next = rx.recv() => next,
                };
                let Some(path) = next else {
                    break;
                };
                self.handle(&path).await;
            }
        }))
    }

    async fn handle(&self, path: &Path) {
        if !path.is_file() {
            return;
        }
        match self.process_file(path).await {
            Ok(Some(result)) => {
                let top = result.predictions.first().map(|p| p.percentage).unwrap_or(0.0);
                tracing::info!("🎭 {}: {} ({:.2}%)", result.file_name(), result.top_emotion, top);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("{} {}", e.marker(), e),
        }
    }

    async fn sweep(&self, signal: &ShutdownSignal) -> Result<SweepResult> {
        let mut sweep = SweepResult::default();

        for path in existing_files(&self.config.receive_dir)? {
            if signal.is_stopped() {
                break;
            }
            match self.process_file(&path).await {
                Ok(Some(_)) => sweep.classified += 1,
                Ok(None) => sweep.skipped += 1,
                Err(e @ PipelineError::PersistenceFailed(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("{} {}", e.marker(), e);
                    sweep.failed += 1;
                }
            }
        }

        Ok(sweep)
    }

    async fn classify(&self, path: &Path) -> Result<ClassificationResult> {
        let waveform = self.loader.load(path).await?;
        let scores = self
            .classifier
            .classify(&waveform)
            .await
            .map_err(|e| match e {
                ClassifierError::Timeout(after) => PipelineError::TimedOut {
                    what: format!("{} on {}", self.classifier.name(), file_name_of(path)),
                    after,
                },
                e => PipelineError::classification(path, e),
            })?;

        ClassificationResult::from_scores(path, scores, self.config.top_k)
            .ok_or_else(|| PipelineError::classification(path, "classifier returned invalid confidences"))
    }
}

/// Paths of interest in a filesystem event
fn event_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.clone(),
        // Both carries [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.get(1).cloned().into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Regular files anywhere under `dir`, in path order, outside hidden directories
fn existing_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let entries = glob::glob(&pattern).map_err(|e| PipelineError::Config(format!("Bad sweep pattern: {}", e)))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|p| !is_hidden_under(dir, p) && p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Whether any component of `path` below `dir` starts with a dot
fn is_hidden_under(dir: &Path, path: &Path) -> bool {
    path.strip_prefix(dir)
        .unwrap_or(path)
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// Absolute form of `path` used as the stage ledger key
fn claim_key(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}
