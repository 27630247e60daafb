//! Wiring of pipeline stages from resolved configuration.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapters::{IngestionClient, ResultPublisher};
use crate::classify::{ClassificationMonitor, CommandClassifier, MonitorConfig, WaveformLoader};
use crate::config::ResolvedConfig;
use crate::core::{DedupLedger, ResultsLog, StageLedger};
use crate::delivery::{DeliveryConfig, DeliveryWorker};
use crate::ingest::{ChunkSplitter, RecordingWatcher, WatcherConfig};

pub fn open_stage_ledger(cfg: &ResolvedConfig) -> Result<Arc<StageLedger>> {
    let ledger = StageLedger::open(&cfg.paths.stage_db)
        .with_context(|| format!("Failed to open stage ledger: {}", cfg.paths.stage_db.display()))?;
    Ok(Arc::new(ledger))
}

pub fn open_dedup_ledger(cfg: &ResolvedConfig) -> Result<Arc<DedupLedger>> {
    let ledger = DedupLedger::open(&cfg.paths.ledger_db)
        .with_context(|| format!("Failed to open ledger: {}", cfg.paths.ledger_db.display()))?;
    Ok(Arc::new(ledger))
}

pub fn recording_watcher(cfg: &ResolvedConfig) -> Result<RecordingWatcher> {
    let splitter = ChunkSplitter::from_settings(&cfg.splitter, cfg.paths.staging_dir.clone());
    Ok(RecordingWatcher::new(
        WatcherConfig::from_config(cfg),
        splitter,
        open_stage_ledger(cfg)?,
    ))
}

pub fn delivery_worker(cfg: &ResolvedConfig) -> Result<DeliveryWorker> {
    let client = IngestionClient::from_settings(&cfg.delivery)?;
    Ok(DeliveryWorker::new(
        DeliveryConfig::from_config(cfg),
        open_dedup_ledger(cfg)?,
        Arc::new(client),
    ))
}

pub fn classification_monitor(cfg: &ResolvedConfig) -> Result<ClassificationMonitor> {
    let classifier = CommandClassifier::new(&cfg.monitor.classifier_command, &cfg.monitor.labels)
        .context("Set monitor.classifier_command in the config file")?
        .with_timeout(cfg.monitor.classifier_timeout());

    // Without durability, processed paths are only remembered for this run
    let stages = if cfg.monitor.durable {
        open_stage_ledger(cfg)?
    } else {
        Arc::new(StageLedger::open_in_memory()?)
    };

    let mut monitor = ClassificationMonitor::new(
        MonitorConfig::from_config(cfg),
        stages,
        WaveformLoader::new(cfg.splitter.ffmpeg_path.clone()).with_timeout(cfg.splitter.ffmpeg_timeout()),
        Arc::new(classifier),
        ResultsLog::new(cfg.paths.results_log.clone()),
    );

    if cfg.publisher.enabled {
        monitor = monitor.with_sink(Arc::new(ResultPublisher::from_settings(&cfg.publisher)?));
    }

    Ok(monitor)
}
