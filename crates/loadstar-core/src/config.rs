//! Configuration system for the loadstar coordinator.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LOADSTAR_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/loadstar/config.toml
//!   3. ~/.config/loadstar/config.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assembler::DEFAULT_CHUNK_SIZE;
use crate::job::JobType;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub network: NetworkConfig,
    pub scheduling: SchedulingConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both job listeners bind to.
    pub bind_addr: String,
    /// Port workers connect to.
    pub worker_port: u16,
    /// Port requesters connect to.
    pub requester_port: u16,
    /// Loopback status API port. 0 = disabled.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Service time of a job on a worker optimised for its type.
    pub fast_service_time: u64,
    /// Service time of a job on any other worker.
    pub slow_service_time: u64,
    /// How often a parked job re-checks for workers.
    pub retry_interval_ms: u64,
    /// How long a job may wait for a worker before it is rejected. 0 = forever.
    pub starvation_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Message bytes per packet.
    pub chunk_size: usize,
    /// How long a new worker has to send its handshake.
    pub handshake_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            scheduling: SchedulingConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            worker_port: 30000,
            requester_port: 30001,
            api_port: 30080,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            fast_service_time: 2,
            slow_service_time: 10,
            retry_interval_ms: 500,
            starvation_timeout_ms: 30_000,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            handshake_timeout_ms: 5_000,
        }
    }
}

impl SchedulingConfig {
    /// Cost of running `job_type` on a worker specialised in `specialty`.
    pub fn service_time(&self, specialty: JobType, job_type: JobType) -> u64 {
        if specialty == job_type {
            self.fast_service_time
        } else {
            self.slow_service_time
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// `None` when parked jobs wait indefinitely.
    pub fn starvation_timeout(&self) -> Option<Duration> {
        (self.starvation_timeout_ms > 0).then(|| Duration::from_millis(self.starvation_timeout_ms))
    }
}

impl ProtocolConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("loadstar")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("worker and requester listeners share port {0}")]
    PortConflict(u16),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CoordinatorConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CoordinatorConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LOADSTAR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CoordinatorConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let net = &self.network;
        if net.worker_port != 0 && net.worker_port == net.requester_port {
            return Err(ConfigError::PortConflict(net.worker_port));
        }
        if self.protocol.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "protocol.chunk_size",
                reason: "must be greater than zero".into(),
            });
        }
        let sched = &self.scheduling;
        if sched.fast_service_time > sched.slow_service_time {
            return Err(ConfigError::Invalid {
                field: "scheduling.fast_service_time",
                reason: format!(
                    "{} exceeds slow_service_time {}",
                    sched.fast_service_time, sched.slow_service_time
                ),
            });
        }
        Ok(())
    }

    /// Apply LOADSTAR_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LOADSTAR_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        override_parsed("LOADSTAR_NETWORK__WORKER_PORT", &mut self.network.worker_port);
        override_parsed("LOADSTAR_NETWORK__REQUESTER_PORT", &mut self.network.requester_port);
        override_parsed("LOADSTAR_NETWORK__API_PORT", &mut self.network.api_port);
        override_parsed(
            "LOADSTAR_SCHEDULING__STARVATION_TIMEOUT_MS",
            &mut self.scheduling.starvation_timeout_ms,
        );
        override_parsed("LOADSTAR_PROTOCOL__CHUNK_SIZE", &mut self.protocol.chunk_size);
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(var) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}
