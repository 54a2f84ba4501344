use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; the primary store.
    pub path: String,
    /// Append-only CSV log kept alongside (or instead of) SQLite.
    #[serde(default)]
    pub flat_file: Option<PathBuf>,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

fn default_max_pool_size() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// `false` = local mode: serve and render stored data, never poll the device.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How often to log collector stats (cycles, errors, snapshots saved) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

impl CollectorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

fn default_stats_log_interval_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    /// Helper argv, e.g. `["python3", "read_boiler.py"]`.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_device_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra environment for the helper (credentials, client id).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_device_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Render after this many saved snapshots. 0 = only on demand.
    #[serde(default = "default_every_cycles")]
    pub every_cycles: u64,
    /// Where `series.json` goes. Unset = no file output.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            every_cycles: default_every_cycles(),
            output_dir: None,
        }
    }
}

fn default_window_days() -> u32 {
    crate::series::DEFAULT_WINDOW_DAYS
}

fn default_every_cycles() -> u64 {
    5
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.collector.interval_secs > 0,
            "collector.interval_secs must be > 0, got {}",
            self.collector.interval_secs
        );
        anyhow::ensure!(
            self.collector.stats_log_interval_secs > 0,
            "collector.stats_log_interval_secs must be > 0, got {}",
            self.collector.stats_log_interval_secs
        );
        anyhow::ensure!(
            !self.collector.enabled || !self.device.command.is_empty(),
            "device.command must be set when collector.enabled = true"
        );
        anyhow::ensure!(
            self.device.timeout_secs > 0,
            "device.timeout_secs must be > 0, got {}",
            self.device.timeout_secs
        );
        anyhow::ensure!(
            self.render.window_days > 0,
            "render.window_days must be > 0, got {}",
            self.render.window_days
        );
        Ok(())
    }
}
