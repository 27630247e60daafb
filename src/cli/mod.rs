//! Command-line interface for callwatch.
//!
//! Each pipeline stage can run on its own (`split`, `deliver`, `monitor`)
//! or together (`run`). Long-running commands stop on Ctrl+C after the
//! in-flight file is finished.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, ResolvedConfig};
use crate::core::{ResultsLog, Stage, StageHandle, StageLedger, StageState};
use crate::domain::ClassificationResult;

pub mod stages;

/// callwatch - call recording ingestion and emotion classification pipeline
#[derive(Parser, Debug)]
#[command(name = "callwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: nearest .callwatch/config.yaml)
    #[arg(long, global = true, env = "CALLWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split finished recordings from the watch directory into chunks
    Split {
        /// Scan once and exit
        #[arg(long)]
        once: bool,
    },

    /// Deliver staged chunks to the ingestion endpoint
    Deliver {
        /// Run a single delivery cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Classify audio arriving in the receive directory
    Monitor {
        /// Skip files already present at startup
        #[arg(long)]
        no_existing: bool,
    },

    /// Run splitter, delivery and monitor together
    Run,

    /// Show pipeline status
    Status,

    /// Show recent classification results
    Results {
        /// Maximum number of results to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Write every result as a JSON array to this file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::load(self.config.as_deref())?;

        match self.command {
            Commands::Split { once } => split(&cfg, once).await,
            Commands::Deliver { once } => deliver(&cfg, once).await,
            Commands::Monitor { no_existing } => monitor(&cfg, !no_existing).await,
            Commands::Run => run_all(&cfg).await,
            Commands::Status => show_status(&cfg),
            Commands::Results { limit, export } => show_results(&cfg, limit, export.as_deref()),
            Commands::Config => show_config(&cfg),
        }
    }
}

async fn split(cfg: &ResolvedConfig, once: bool) -> Result<()> {
    cfg.ensure_dirs()?;
    let watcher = stages::recording_watcher(cfg)?;

    if once {
        println!("📂 Scanning once: {}", cfg.paths.watch_dir.display());
        watcher.recover()?;
        let result = watcher.scan_once().await?;

        println!();
        println!("Scan Results:");
        println!("  Split:               {}", result.split);
        println!("  Chunks written:      {}", result.chunks);
        println!("  Already processed:   {}", result.already_processed);
        println!("  Not ready:           {}", result.not_ready);
        if result.malformed > 0 {
            println!("  Malformed names:     {}", result.malformed);
        }
        if result.failed > 0 {
            println!("  Failed:              {}", result.failed);
        }
        println!("  Total scanned:       {}", result.total_scanned());
        return Ok(());
    }

    println!("👁️  Watching: {}", cfg.paths.watch_dir.display());
    wait_then_stop(vec![watcher.watch()?]).await
}

async fn deliver(cfg: &ResolvedConfig, once: bool) -> Result<()> {
    cfg.ensure_dirs()?;
    let mut worker = stages::delivery_worker(cfg)?;

    if once {
        println!("📤 Delivering from {} to {}", cfg.paths.staging_dir.display(), cfg.delivery.endpoint);
        let cycle = worker.poll_once().await?;

        println!();
        println!("Delivery Results:");
        println!("  Delivered:     {}", cycle.delivered);
        println!("  Already sent:  {}", cycle.already_sent);
        println!("  Failed:        {}", cycle.failed);
        if cycle.malformed > 0 {
            println!("  Malformed:     {}", cycle.malformed);
        }
        if cycle.unchecked > 0 {
            println!("  Unchecked:     {}", cycle.unchecked);
        }
        return Ok(());
    }

    println!("🚀 Delivering: {} → {}", cfg.paths.staging_dir.display(), cfg.delivery.endpoint);
    wait_then_stop(vec![worker.spawn()]).await
}

async fn monitor(cfg: &ResolvedConfig, sweep_existing: bool) -> Result<()> {
    cfg.ensure_dirs()?;
    let monitor = stages::classification_monitor(cfg)?;

    println!("🔍 Monitoring: {}", cfg.paths.receive_dir.display());
    println!("💾 Results: {}", cfg.paths.results_log.display());
    wait_then_stop(vec![monitor.watch(sweep_existing)?]).await
}

async fn run_all(cfg: &ResolvedConfig) -> Result<()> {
    cfg.ensure_dirs()?;

    let handles = vec![
        stages::recording_watcher(cfg)?.watch()?,
        stages::delivery_worker(cfg)?.spawn(),
        stages::classification_monitor(cfg)?.watch(true)?,
    ];

    println!("🎧 callwatch running");
    println!("  Watch:    {}", cfg.paths.watch_dir.display());
    println!("  Staging:  {}", cfg.paths.staging_dir.display());
    println!("  Receive:  {}", cfg.paths.receive_dir.display());
    wait_then_stop(handles).await
}

/// Block until Ctrl+C, then stop every stage in order
async fn wait_then_stop(handles: Vec<StageHandle>) -> Result<()> {
    println!("    Press Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("🛑 Stopping...");
    for handle in handles {
        handle.stop().await?;
    }
    println!("✅ Stopped");
    Ok(())
}

fn show_status(cfg: &ResolvedConfig) -> Result<()> {
    println!();
    println!("callwatch Status");
    println!("══════════════════════════════════════════════════════════════");
    println!();

    println!("Directories:");
    println!("  Watch:    {:<50} {} file(s)", cfg.paths.watch_dir.display(), count_files(&cfg.paths.watch_dir));
    println!("  Staging:  {:<50} {} file(s)", cfg.paths.staging_dir.display(), count_files(&cfg.paths.staging_dir));
    println!("  Sent:     {:<50} {} file(s)", cfg.paths.sent_dir.display(), count_files(&cfg.paths.sent_dir));
    println!("  Receive:  {:<50} {} file(s)", cfg.paths.receive_dir.display(), count_files(&cfg.paths.receive_dir));
    println!();

    if cfg.paths.stage_db.exists() {
        let stage_ledger = StageLedger::open(&cfg.paths.stage_db)?;
        println!("Stages:");
        println!(
            "  Split:     {} done, {} in progress",
            stage_ledger.count(Stage::Split, StageState::Done)?,
            stage_ledger.count(Stage::Split, StageState::Claimed)?
        );
        println!(
            "  Classify:  {} done, {} in progress",
            stage_ledger.count(Stage::Classify, StageState::Done)?,
            stage_ledger.count(Stage::Classify, StageState::Claimed)?
        );
        println!();
    }

    if cfg.paths.ledger_db.exists() {
        let ledger = stages::open_dedup_ledger(cfg)?;
        println!("Delivery ledger: {} chunk(s) sent", ledger.sent_count()?);
        for record in ledger.recent(5)? {
            println!("  {}  {}", record.sent_at.format("%Y-%m-%d %H:%M:%S"), record.filename);
        }
        println!();
    } else {
        println!("Delivery ledger: (not created yet)");
        println!();
    }

    let results = ResultsLog::new(cfg.paths.results_log.clone()).read_all()?;
    println!("Results: {} classification(s)", results.len());
    println!();

    Ok(())
}

fn show_results(cfg: &ResolvedConfig, limit: usize, export: Option<&Path>) -> Result<()> {
    let log = ResultsLog::new(cfg.paths.results_log.clone());

    if let Some(dest) = export {
        let count = log.export_json(dest)?;
        println!("✅ Exported {} result(s) to {}", count, dest.display());
        return Ok(());
    }

    let results = log.read_all()?;
    if results.is_empty() {
        println!("No results yet");
        return Ok(());
    }

    let skip = results.len().saturating_sub(limit);
    for result in &results[skip..] {
        print_result(result);
    }

    Ok(())
}

fn print_result(result: &ClassificationResult) {
    println!();
    println!("🎭 Emotion Analysis for: {}", result.file_name());
    println!("{}", "-".repeat(50));
    for (i, prediction) in result.predictions.iter().enumerate() {
        println!("{}. {}: {:.2}%", i + 1, prediction.emotion, prediction.percentage);
    }
    println!("📊 Top Emotion: {}  ({})", result.top_emotion, result.timestamp.to_rfc3339());
    println!("{}", "-".repeat(50));
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  callwatch Configuration");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:         {}", cfg.paths.home.display());
    println!("  Watch:        {}", cfg.paths.watch_dir.display());
    println!("  Staging:      {}", cfg.paths.staging_dir.display());
    println!("  Sent:         {}", cfg.paths.sent_dir.display());
    println!("  Receive:      {}", cfg.paths.receive_dir.display());
    println!("  Results log:  {}", cfg.paths.results_log.display());
    println!("  Ledger:       {}", cfg.paths.ledger_db.display());
    println!("  Stages:       {}", cfg.paths.stage_db.display());
    println!();
    println!("Splitter:");
    println!("  Chunk length: {}s", cfg.splitter.chunk_seconds);
    println!("  Segmenter:    {:?} ({})", cfg.splitter.segmenter, cfg.splitter.ffmpeg_path);
    println!("  Quiescence:   {}s", cfg.readiness.quiescence_secs);
    println!();
    println!("Delivery:");
    println!("  Endpoint:     {}", cfg.delivery.endpoint);
    println!("  Mode:         {}", cfg.delivery.mode);
    println!("  Poll:         {}s", cfg.delivery.poll_interval_secs);
    println!(
        "  Backoff:      {}ms → {}ms (x{})",
        cfg.delivery.backoff.initial_delay_ms, cfg.delivery.backoff.max_delay_ms, cfg.delivery.backoff.multiplier
    );
    println!();
    println!("Monitor:");
    println!(
        "  Classifier:   {}",
        if cfg.monitor.classifier_command.is_empty() {
            "(not configured)".to_string()
        } else {
            cfg.monitor.classifier_command.join(" ")
        }
    );
    println!("  Labels:       {}", cfg.monitor.labels.join(", "));
    println!("  Durable:      {}", cfg.monitor.durable);
    println!();
    println!("Publisher:");
    println!(
        "  {}            {}",
        if cfg.publisher.enabled { "✓" } else { "✗" },
        cfg.publisher.url
    );

    Ok(())
}

/// Regular, non-hidden files directly in `dir`
fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file() && !e.file_name().to_string_lossy().starts_with('.'))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["callwatch", "deliver", "--once"]).unwrap();
        assert!(matches!(cli.command, Commands::Deliver { once: true }));

        let cli = Cli::try_parse_from(["callwatch", "results", "--limit", "3", "--config", "/etc/cw.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/cw.yaml")));
        assert!(matches!(cli.command, Commands::Results { limit: 3, export: None }));

        let cli = Cli::try_parse_from(["callwatch", "monitor", "--no-existing"]).unwrap();
        assert!(matches!(cli.command, Commands::Monitor { no_existing: true }));
    }

    #[test]
    fn test_count_files_skips_hidden_and_dirs() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.wav"), b"x").unwrap();
        std::fs::write(temp.path().join(".hidden"), b"x").unwrap();
        std::fs::create_dir(temp.path().join(".split-1")).unwrap();

        assert_eq!(count_files(temp.path()), 1);
        assert_eq!(count_files(&temp.path().join("missing")), 0);
    }
}
