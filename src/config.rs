//! Configuration for the callwatch pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CALLWATCH_HOME, CALLWATCH_INGEST_URL, CALLWATCH_RESULTS_URL)
//! 2. Config file (explicit `--config`, or .callwatch/config.yaml)
//! 3. Defaults (~/.callwatch)
//!
//! Config file discovery:
//! - Searches current directory and parents for .callwatch/config.yaml
//! - Paths in config file are relative to the directory containing .callwatch/

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::BackoffPolicy;
use crate::delivery::DeliveryMode;
use crate::domain::{DEFAULT_LABELS, TOP_K};
use crate::ingest::SegmenterKind;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub splitter: SplitterSettings,
    #[serde(default)]
    pub readiness: ReadinessSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub publisher: PublisherSettings,
}

/// Directory layout; each entry is relative to the config base when not absolute
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (ledgers, results log)
    pub home: Option<String>,
    /// Raw recordings written by the call recorder
    pub watch_dir: Option<String>,
    /// Chunks waiting for delivery
    pub staging_dir: Option<String>,
    /// Delivered chunks (move mode)
    pub sent_dir: Option<String>,
    /// Chunks accepted by the ingestion endpoint
    pub receive_dir: Option<String>,
    pub results_log: Option<String>,
    pub ledger_db: Option<String>,
    pub stage_db: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterSettings {
    /// Chunk length in seconds (default: 15)
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: u64,

    /// Watch directory poll interval in seconds (default: 5)
    #[serde(default = "default_split_poll")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub segmenter: SegmenterKind,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,

    /// Kill an ffmpeg split or decode after this many seconds (default: 300)
    #[serde(default = "default_ffmpeg_timeout")]
    pub ffmpeg_timeout_secs: u64,

    /// Recording extensions picked up from the watch directory
    #[serde(default = "default_chunk_extensions")]
    pub extensions: Vec<String>,
}

fn default_chunk_seconds() -> u64 {
    15
}
fn default_split_poll() -> u64 {
    5
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffmpeg_timeout() -> u64 {
    300
}
fn default_chunk_extensions() -> Vec<String> {
    vec!["wav".to_string()]
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self {
            chunk_seconds: default_chunk_seconds(),
            poll_interval_secs: default_split_poll(),
            segmenter: SegmenterKind::default(),
            ffmpeg_path: default_ffmpeg(),
            ffmpeg_timeout_secs: default_ffmpeg_timeout(),
            extensions: default_chunk_extensions(),
        }
    }
}

impl SplitterSettings {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs(self.chunk_seconds.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn ffmpeg_timeout(&self) -> Duration {
        Duration::from_secs(self.ffmpeg_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSettings {
    /// Wait between the two size checks, in seconds (default: 2)
    #[serde(default = "default_quiescence")]
    pub quiescence_secs: f64,
}

fn default_quiescence() -> f64 {
    2.0
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            quiescence_secs: default_quiescence(),
        }
    }
}

impl ReadinessSettings {
    pub fn quiescence(&self) -> Duration {
        Duration::from_secs_f64(self.quiescence_secs.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Ingestion endpoint (multipart POST)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Staging poll interval in seconds (default: 2)
    #[serde(default = "default_delivery_poll")]
    pub poll_interval_secs: u64,

    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub mode: DeliveryMode,

    /// Chunk extensions picked up from staging
    #[serde(default = "default_chunk_extensions")]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub backoff: BackoffPolicy,
}

fn default_endpoint() -> String {
    "http://localhost:5000/receive_audio".to_string()
}
fn default_delivery_poll() -> u64 {
    2
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            poll_interval_secs: default_delivery_poll(),
            request_timeout_secs: default_request_timeout(),
            mode: DeliveryMode::default(),
            extensions: default_chunk_extensions(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl DeliverySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Audio extensions classified from the receiving directory
    #[serde(default = "default_audio_extensions")]
    pub extensions: Vec<String>,

    /// Wait after an event before reading the file, in milliseconds (default: 500)
    #[serde(default = "default_settle")]
    pub settle_millis: u64,

    /// Persist processed files across restarts (default: true)
    #[serde(default = "default_true")]
    pub durable: bool,

    /// External classifier: program followed by its arguments
    #[serde(default)]
    pub classifier_command: Vec<String>,

    /// Kill the classifier after this many seconds (default: 60)
    #[serde(default = "default_classifier_timeout")]
    pub classifier_timeout_secs: u64,

    /// Closed label set the classifier may return
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,

    /// Predictions kept per result (default: 3)
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_audio_extensions() -> Vec<String> {
    ["wav", "mp3", "flac", "m4a", "ogg", "wma"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_settle() -> u64 {
    500
}
fn default_classifier_timeout() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_labels() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
}
fn default_top_k() -> usize {
    TOP_K
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            extensions: default_audio_extensions(),
            settle_millis: default_settle(),
            durable: default_true(),
            classifier_command: Vec::new(),
            classifier_timeout_secs: default_classifier_timeout(),
            labels: default_labels(),
            top_k: default_top_k(),
        }
    }
}

impl MonitorSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Results consumer endpoint (JSON POST)
    #[serde(default = "default_results_url")]
    pub url: String,

    #[serde(default = "default_publish_timeout")]
    pub request_timeout_secs: u64,

    /// Sent as `user_id`; the agent is not known from the file name
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_results_url() -> String {
    "http://localhost:3000/api/receive-prediction".to_string()
}
fn default_publish_timeout() -> u64 {
    10
}
fn default_user_id() -> String {
    "system".to_string()
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            url: default_results_url(),
            request_timeout_secs: default_publish_timeout(),
            user_id: default_user_id(),
        }
    }
}

impl PublisherSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Resolved directory layout with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub home: PathBuf,
    pub watch_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub sent_dir: PathBuf,
    pub receive_dir: PathBuf,
    pub results_log: PathBuf,
    pub ledger_db: PathBuf,
    pub stage_db: PathBuf,
}

impl ResolvedPaths {
    /// Default layout under a state directory
    pub fn under(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            watch_dir: paths::watch_dir(home),
            staging_dir: paths::staging_dir(home),
            sent_dir: paths::sent_dir(home),
            receive_dir: paths::receive_dir(home),
            results_log: paths::results_log(home),
            ledger_db: paths::ledger_db(home),
            stage_db: paths::stage_db(home),
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub paths: ResolvedPaths,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub splitter: SplitterSettings,
    pub readiness: ReadinessSettings,
    pub delivery: DeliverySettings,
    pub monitor: MonitorSettings,
    pub publisher: PublisherSettings,
}

impl ResolvedConfig {
    /// Defaults rooted at `home`, ignoring files and environment
    pub fn with_home(home: &Path) -> Self {
        Self::from_file(ConfigFile::default(), ResolvedPaths::under(home), None)
    }

    fn from_file(file: ConfigFile, paths: ResolvedPaths, config_file: Option<PathBuf>) -> Self {
        Self {
            paths,
            config_file,
            splitter: file.splitter,
            readiness: file.readiness,
            delivery: file.delivery,
            monitor: file.monitor,
            publisher: file.publisher,
        }
    }

    /// Create every directory the pipeline writes into
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.paths.home,
            &self.paths.watch_dir,
            &self.paths.staging_dir,
            &self.paths.sent_dir,
            &self.paths.receive_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".callwatch").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_config(content: &str) -> Result<ConfigFile> {
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Resolve a path that may be relative to the config base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Base directory for relative paths: the parent of `.callwatch/`, else the file's directory
fn config_base(config_path: &Path) -> PathBuf {
    let dir = config_path.parent().unwrap_or(Path::new("."));
    if dir.file_name().map(|n| n == ".callwatch").unwrap_or(false) {
        dir.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        dir.to_path_buf()
    }
}

fn default_home() -> Result<PathBuf> {
    if let Ok(env_home) = std::env::var("CALLWATCH_HOME") {
        return Ok(PathBuf::from(env_home));
    }
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".callwatch"))
}

fn resolve_paths(file: &PathsConfig, base: &Path) -> Result<ResolvedPaths> {
    let home = match (std::env::var("CALLWATCH_HOME"), &file.home) {
        (Ok(env_home), _) => PathBuf::from(env_home),
        (Err(_), Some(home)) => resolve_path(base, home),
        (Err(_), None) => default_home()?,
    };

    let defaults = ResolvedPaths::under(&home);
    let pick = |value: &Option<String>, fallback: PathBuf| {
        value
            .as_deref()
            .map(|p| resolve_path(base, p))
            .unwrap_or(fallback)
    };

    Ok(ResolvedPaths {
        watch_dir: pick(&file.watch_dir, defaults.watch_dir),
        staging_dir: pick(&file.staging_dir, defaults.staging_dir),
        sent_dir: pick(&file.sent_dir, defaults.sent_dir),
        receive_dir: pick(&file.receive_dir, defaults.receive_dir),
        results_log: pick(&file.results_log, defaults.results_log),
        ledger_db: pick(&file.ledger_db, defaults.ledger_db),
        stage_db: pick(&file.stage_db, defaults.stage_db),
        home,
    })
}

fn apply_env_overrides(config: &mut ResolvedConfig) {
    if let Ok(url) = std::env::var("CALLWATCH_INGEST_URL") {
        config.delivery.endpoint = url;
    }
    if let Ok(url) = std::env::var("CALLWATCH_RESULTS_URL") {
        config.publisher.url = url;
    }
}

/// Load configuration from all sources
pub fn load(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let mut config = if let Some(ref path) = config_path {
        let file = load_config_file(path)?;
        let paths = resolve_paths(&file.paths, &config_base(path))?;
        ResolvedConfig::from_file(file, paths, config_path.clone())
    } else {
        let home = default_home()?;
        ResolvedConfig::with_home(&home)
    };

    apply_env_overrides(&mut config);
    Ok(config)
}
