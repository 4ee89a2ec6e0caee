use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::archive::DEFAULT_ARCHIVE_EXTENSIONS;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per download (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff on rate limiting (doubles per attempt).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds (server `Retry-After` hints may exceed it).
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 60,
        }
    }
}

/// Circuit breaker parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive rate-limit failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a half-open trial.
    pub open_duration_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_secs: 30,
        }
    }
}

/// Adaptive throttle parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Delay added on each rate-limit failure.
    pub step_ms: u64,
    /// Delay removed on each success.
    pub decrease_ms: u64,
    /// Upper bound on the delay.
    pub max_delay_ms: u64,
    /// Upper bound on the random jitter added to every delayed wait.
    pub jitter_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            step_ms: 1000,
            decrease_ms: 500,
            max_delay_ms: 10_000,
            jitter_ms: 500,
        }
    }
}

/// Archive expansion parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Maximum nesting depth expanded; deeper archives are kept as files.
    pub max_depth: u32,
    /// File extensions (without dot, case-insensitive) treated as archives.
    pub extensions: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// What the worker pool does when a task fails.
///
/// Both modes currently log the failure and move on to the next task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    #[default]
    Ignore,
    Report,
}

/// Global configuration loaded from `~/.config/harvest/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Root directory for downloads; relative paths resolve against the working directory.
    pub download_dir: PathBuf,
    /// Maximum number of catalog entries processed concurrently.
    pub max_parallel: usize,
    /// Interval between catalog polls, in seconds.
    pub poll_interval_secs: u64,
    /// Total timeout for a single download attempt, in seconds.
    pub request_timeout_secs: u64,
    /// Connect timeout for a single download attempt, in seconds.
    pub connect_timeout_secs: u64,
    /// Free space below which a warning is logged before downloading.
    pub min_free_bytes: u64,
    /// Number of log events kept in the in-memory history.
    pub log_capacity: usize,
    /// How often the progress aggregator drains its queue, in milliseconds.
    pub flush_interval_ms: u64,
    /// Longest server-requested Retry-After wait that is honoured, in seconds.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
    #[serde(default)]
    pub on_failure: FailureMode,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub breaker: Option<BreakerConfig>,
    #[serde(default)]
    pub throttle: Option<ThrottleConfig>,
    #[serde(default)]
    pub archive: Option<ArchiveConfig>,
}

fn default_max_retry_after_secs() -> u64 {
    600
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            max_parallel: 5,
            poll_interval_secs: 30 * 60,
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
            min_free_bytes: 512 * 1024 * 1024,
            log_capacity: 1000,
            flush_interval_ms: 1000,
            max_retry_after_secs: default_max_retry_after_secs(),
            on_failure: FailureMode::Ignore,
            retry: None,
            breaker: None,
            throttle: None,
            archive: None,
        }
    }
}

impl HarvestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(10))
    }

    pub fn retry_or_default(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn breaker_or_default(&self) -> BreakerConfig {
        self.breaker.clone().unwrap_or_default()
    }

    pub fn throttle_or_default(&self) -> ThrottleConfig {
        self.throttle.clone().unwrap_or_default()
    }

    pub fn archive_or_default(&self) -> ArchiveConfig {
        self.archive.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("harvest")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<HarvestConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = HarvestConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: HarvestConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
