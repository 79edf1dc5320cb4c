//! ---
//! wiki_section: "01-core-functionality"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Shared primitives and utilities for the core runtime."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_max_pool_size() -> u32 {
    30
}

fn default_http_port() -> u16 {
    8080
}

fn default_replica_count() -> usize {
    2
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_rates_endpoint() -> String {
    "https://api.exchangeratesapi.io/latest".to_owned()
}

fn default_rates_base() -> String {
    "BGN".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_mailbox_capacity() -> usize {
    1024
}

fn default_start_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the wiki runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub exchange_rates: ExchangeRateConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
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
    pub const ENV_CONFIG_PATH: &'static str = "WIKI_CONFIG";

    /// Load configuration from disk, respecting the `WIKI_CONFIG` override.
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
        self.database.validate()?;
        self.http.validate()?;
        self.exchange_rates.validate()?;
        self.bus.validate()?;
        if self.deployment.start_timeout.is_zero() {
            return Err(anyhow!("deployment.start_timeout must be greater than zero"));
        }
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

/// Settings owned by the persistence unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    /// Optional properties file with the statement templates. The embedded
    /// defaults are used when unset.
    #[serde(default)]
    pub queries_resource_path: Option<PathBuf>,
    /// Optional JSON file the page table is persisted to between runs.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            queries_resource_path: None,
            snapshot_path: None,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 {
            return Err(anyhow!("database.max_pool_size must be at least 1"));
        }
        Ok(())
    }
}

/// Settings for the HTTP-facing unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_replica_count")]
    pub replica_count: usize,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            replica_count: default_replica_count(),
            bind_address: default_bind_address(),
        }
    }
}

impl HttpConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_count == 0 {
            return Err(anyhow!("http.replica_count must be at least 1"));
        }
        Ok(())
    }
}

/// Settings for the optional exchange-rate unit.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRateConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rates_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_rates_base")]
    pub base: String,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub refresh_interval: Option<Duration>,
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_rates_endpoint(),
            base: default_rates_base(),
            refresh_interval: None,
        }
    }
}

impl ExchangeRateConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        url::Url::parse(&self.endpoint)
            .with_context(|| format!("exchange_rates.endpoint '{}' is not a url", self.endpoint))?;
        if self.base.trim().is_empty() {
            return Err(anyhow!("exchange_rates.base must not be empty"));
        }
        if matches!(self.refresh_interval, Some(interval) if interval.is_zero()) {
            return Err(anyhow!("exchange_rates.refresh_interval must be greater than zero"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_request_timeout", rename = "request_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(anyhow!("bus.mailbox_capacity must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("bus.request_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// What the startup sequence does with phases that already succeeded when a
/// later phase fails.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    #[default]
    KeepRunning,
    UndeployCompleted,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_start_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub start_timeout: Duration,
    #[serde(default)]
    pub rollback: RollbackPolicy,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            start_timeout: default_start_timeout(),
            rollback: RollbackPolicy::default(),
        }
    }
}

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
