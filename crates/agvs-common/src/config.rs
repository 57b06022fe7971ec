//! ---
//! agvs_section: "01-common-runtime"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Configuration loading and validation."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_broker_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "agvs-backend".to_owned()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_clean_session() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    64
}

fn default_reconnect_min_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_reconnect_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_pending_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_queue_capacity() -> usize {
    64
}

fn default_journal_directory() -> PathBuf {
    PathBuf::from("target/journal")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9464"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the AGVS coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "AGVS_CONFIG";

    /// Load configuration from disk, respecting the `AGVS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        self.correlator.validate()?;
        self.telemetry.validate()?;
        self.fleet.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Broker endpoint and session parameters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Prefix for the broker client id; a random suffix is appended per
    /// session so two coordinators never collide.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive: Duration,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Capacity of the inbound message stream between the connection task and
    /// the dispatch loop.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_reconnect_min_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_min_delay: Duration,
    #[serde(default = "default_reconnect_max_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_max_delay: Duration,
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("broker.host must not be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("broker.port must not be zero"));
        }
        if self.channel_capacity == 0 {
            return Err(anyhow!("broker.channel_capacity must be at least 1"));
        }
        if self.keep_alive.is_zero() {
            return Err(anyhow!("broker.keep_alive must not be zero"));
        }
        if self.reconnect_min_delay.is_zero() {
            return Err(anyhow!("broker.reconnect_min_delay must not be zero"));
        }
        if self.reconnect_min_delay > self.reconnect_max_delay {
            return Err(anyhow!(
                "broker.reconnect_min_delay must not exceed broker.reconnect_max_delay"
            ));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id_prefix: default_client_id_prefix(),
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            clean_session: default_clean_session(),
            channel_capacity: default_channel_capacity(),
            reconnect_min_delay: default_reconnect_min_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
        }
    }
}

/// Pending-command bookkeeping parameters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Age after which an unanswered command is evicted.
    #[serde(default = "default_pending_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub pending_timeout: Duration,
    /// How often the expiry sweep runs.
    #[serde(default = "default_sweep_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl CorrelatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pending_timeout.is_zero() {
            return Err(anyhow!("correlator.pending_timeout must not be zero"));
        }
        if self.sweep_interval.is_zero() {
            return Err(anyhow!("correlator.sweep_interval must not be zero"));
        }
        Ok(())
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            pending_timeout: default_pending_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Telemetry ingest parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Bounded queue depth per vehicle worker; overflow drops the sample.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(anyhow!("telemetry.queue_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Fleet bootstrap: vehicles known before the first runtime registration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetConfig {
    /// Vehicle ids seeded into the store at startup. Vehicles may also be
    /// registered at runtime; an empty list is valid.
    #[serde(default)]
    pub vehicles: Vec<i64>,
    /// Optional JSON file seeding the map graph and alarm taxonomy.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

impl FleetConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for id in &self.vehicles {
            if !seen.insert(id) {
                return Err(anyhow!("fleet.vehicles lists vehicle {} twice", id));
            }
        }
        Ok(())
    }
}

/// Append-only fleet event journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_journal_directory")]
    pub directory: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_journal_directory(),
        }
    }
}

/// Prometheus exporter endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Log output destination and format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
