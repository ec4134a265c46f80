use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Which distribution buckets this node serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketSelection {
    /// Every bucket in which `worker_id` is an active operator.
    All,
    /// Exactly these bucket ids.
    Ids(Vec<String>),
}

/// Where the directory catalog snapshot lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub catalog_path: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("catalog.json"),
        }
    }
}

/// Optional overrides for on-disk locations; XDG defaults are used when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    /// Directory holding cached objects and their `.part` files.
    #[serde(default)]
    pub assets: Option<PathBuf>,
    /// Directory holding `state.db`.
    #[serde(default)]
    pub state: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Global cap on concurrent object transfers.
    pub max_concurrent_downloads: usize,
    /// Availability probes in flight per download.
    pub availability_checks_per_download: usize,
    /// Latency probes in flight per probe cycle.
    pub response_time_checks: usize,
    /// Timeout for probe and version requests.
    pub outbound_request_timeout_ms: u64,
    /// In-memory tail kept per transfer for readers that keep up; slower
    /// readers are served from the partial file.
    #[serde(default = "default_replay_window_bytes")]
    pub replay_window_bytes: usize,
}

fn default_replay_window_bytes() -> usize {
    crate::body::DEFAULT_REPLAY_WINDOW_BYTES
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 50,
            availability_checks_per_download: 10,
            response_time_checks: 10,
            outbound_request_timeout_ms: 5000,
            replay_window_bytes: default_replay_window_bytes(),
        }
    }
}

impl LimitsConfig {
    pub fn outbound_request_timeout(&self) -> Duration {
        Duration::from_millis(self.outbound_request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalsConfig {
    pub save_state_secs: u64,
    pub check_response_times_secs: u64,
    pub cache_cleanup_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            save_state_secs: 60,
            check_response_times_secs: 60,
            cache_cleanup_secs: 60,
        }
    }
}

/// Grace period for in-flight downloads on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
        }
    }
}

impl ShutdownConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Node configuration loaded from `~/.config/distnode/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistnodeConfig {
    /// Distribution worker id of this node's operator.
    pub worker_id: u64,
    /// Served bucket ids; absent means every bucket the worker operates.
    #[serde(default)]
    pub buckets: Option<Vec<String>>,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub directories: DirectoriesConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl DistnodeConfig {
    pub fn bucket_selection(&self) -> BucketSelection {
        match &self.buckets {
            Some(ids) => BucketSelection::Ids(ids.clone()),
            None => BucketSelection::All,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("distnode")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DistnodeConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DistnodeConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DistnodeConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
