//! Configuration for minifs components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "MINIFS_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "minifs.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Storage-node-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<ReplicaConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: None,
            replica: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load `minifs.toml` (or the file named by `MINIFS_CONFIG`) and
    /// `MINIFS__*` environment overrides. Missing sources are skipped.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MINIFS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        if let Some(coordinator) = &config.coordinator {
            coordinator.validate()?;
        }
        if let Some(replica) = &config.replica {
            replica.validate()?;
        }
        Ok(config)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Listening address for replicas and clients
    #[serde(default = "default_coordinator_addr")]
    pub bind_addr: SocketAddr,

    /// Replication factor R
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// ACK and handshake timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Rebalance period, accepted for launcher compatibility
    #[serde(default = "default_rebalance_period_ms")]
    pub rebalance_period_ms: u64,
}

fn default_coordinator_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 12345))
}
fn default_replication_factor() -> usize {
    3
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_rebalance_period_ms() -> u64 {
    10_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coordinator_addr(),
            replication_factor: default_replication_factor(),
            timeout_ms: default_timeout_ms(),
            rebalance_period_ms: default_rebalance_period_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication factor must be at least 1".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Storage node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Client-facing listening address; port 0 picks a free port
    #[serde(default = "default_replica_addr")]
    pub bind_addr: SocketAddr,

    /// Coordinator to join
    #[serde(default = "default_coordinator_target")]
    pub coordinator_addr: SocketAddr,

    /// Timeout for joining and for receiving file contents
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Directory holding stored files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Empty the data directory on start
    #[serde(default = "default_clean_on_start")]
    pub clean_on_start: bool,
}

fn default_replica_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}
fn default_coordinator_target() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 12345))
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./replica-data")
}
fn default_clean_on_start() -> bool {
    true
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_replica_addr(),
            coordinator_addr: default_coordinator_target(),
            timeout_ms: default_timeout_ms(),
            data_dir: default_data_dir(),
            clean_on_start: default_clean_on_start(),
        }
    }
}

impl ReplicaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.replication_factor, 3);
        assert_eq!(config.timeout(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_replication() {
        let config = CoordinatorConfig {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minifs.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n\n[coordinator]\nbind_addr = \"127.0.0.1:9000\"\nreplication_factor = 2\ntimeout_ms = 250"
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        let coordinator = config.coordinator.unwrap();
        assert_eq!(coordinator.replication_factor, 2);
        assert_eq!(coordinator.timeout_ms, 250);
        assert_eq!(coordinator.rebalance_period_ms, 10_000);
        assert!(config.replica.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.coordinator.is_none());
        assert_eq!(config.log_level, "info");
    }
}
