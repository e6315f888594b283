//! Node Configuration
//!
//! Settings consumed at startup: whether clustering is on, the cluster name,
//! the local gossip endpoint, the number of worker lanes and the queue polling
//! delay. Values come from an optional TOML file and are then overridden by
//! command-line flags (see `main.rs`).
//!
//! Every invalid or missing value is a startup-time `ConfigError`; nothing in
//! this module is consulted again once the node is running.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on the number of lanes a single node may run.
pub const MAX_WORKER_COUNT: usize = 10;
pub const DEFAULT_WORKER_COUNT: usize = 1;
pub const DEFAULT_POLL_DELAY_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker count must be between 1 and {max}, got {got}")]
    InvalidWorkerCount { got: usize, max: usize },

    #[error("queue polling delay must be greater than zero")]
    InvalidPollDelay,

    #[error("cluster is not enabled")]
    ClusterDisabled,

    #[error("cluster name is missing")]
    MissingClusterName,

    #[error("local endpoint has not been set")]
    MissingLocalEndpoint,

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    pub name: String,
    /// UDP address the gossip socket binds to.
    pub local_endpoint: Option<SocketAddr>,
    pub seeds: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub poll_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            poll_delay_ms: DEFAULT_POLL_DELAY_MS,
        }
    }
}

impl Config {
    /// Reads a TOML file. Missing sections fall back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Validates the scheduler section always and the cluster section only
    /// when clustering is switched on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        if self.cluster.enabled {
            self.cluster.validate()?;
        }
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(ConfigError::InvalidWorkerCount {
                got: self.worker_count,
                max: MAX_WORKER_COUNT,
            });
        }
        if self.poll_delay_ms == 0 {
            return Err(ConfigError::InvalidPollDelay);
        }
        Ok(())
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

impl ClusterConfig {
    /// Checks the settings a cluster connection cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Err(ConfigError::ClusterDisabled);
        }
        if self.local_endpoint.is_none() {
            return Err(ConfigError::MissingLocalEndpoint);
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingClusterName);
        }
        Ok(())
    }

    /// Validated local endpoint.
    pub fn endpoint(&self) -> Result<SocketAddr, ConfigError> {
        self.validate()?;
        self.local_endpoint.ok_or(ConfigError::MissingLocalEndpoint)
    }
}
