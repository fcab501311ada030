//! Worker settings, read once from the environment at startup.

use std::time::Duration;

use satyamatrix_core::LaneOrder;

use crate::jobs::{KeyLayout, ResultEncoding, WorkerConfig};

pub const REDIS_URL: &str = "REDIS_URL";
pub const WORKER_QUEUES: &str = "WORKER_QUEUES";
pub const WORKER_NAME: &str = "WORKER_NAME";
pub const WORKER_KEY_PREFIX: &str = "WORKER_KEY_PREFIX";
pub const WORKER_IDLE_INTERVAL_MS: &str = "WORKER_IDLE_INTERVAL_MS";
pub const WORKER_RECOVERY_INTERVAL_MS: &str = "WORKER_RECOVERY_INTERVAL_MS";
pub const WORKER_RESULT_ENCODING: &str = "WORKER_RESULT_ENCODING";

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {var}: {message}")]
pub struct ConfigError {
    pub var: &'static str,
    pub message: String,
}

impl ConfigError {
    fn new(var: &'static str, message: impl Into<String>) -> Self {
        Self {
            var,
            message: message.into(),
        }
    }
}

/// Process-level worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub redis_url: String,
    pub lanes: LaneOrder,
    pub worker_name: String,
    pub key_prefix: String,
    pub idle_interval: Duration,
    pub recovery_interval: Duration,
    pub result_encoding: ResultEncoding,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let lanes = match get(WORKER_QUEUES) {
            Some(raw) => raw
                .parse::<LaneOrder>()
                .map_err(|e| ConfigError::new(WORKER_QUEUES, e.to_string()))?,
            None => LaneOrder::default(),
        };

        let result_encoding = match get(WORKER_RESULT_ENCODING) {
            Some(raw) => raw
                .parse::<ResultEncoding>()
                .map_err(|e| ConfigError::new(WORKER_RESULT_ENCODING, e))?,
            None => ResultEncoding::default(),
        };

        Ok(Self {
            redis_url: get(REDIS_URL).unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            lanes,
            worker_name: get(WORKER_NAME).unwrap_or_else(default_worker_name),
            key_prefix: get(WORKER_KEY_PREFIX).unwrap_or_else(|| KeyLayout::DEFAULT_PREFIX.to_string()),
            idle_interval: millis(WORKER_IDLE_INTERVAL_MS, get(WORKER_IDLE_INTERVAL_MS), 2_000)?,
            recovery_interval: millis(
                WORKER_RECOVERY_INTERVAL_MS,
                get(WORKER_RECOVERY_INTERVAL_MS),
                5_000,
            )?,
            result_encoding,
        })
    }

    pub fn key_layout(&self) -> KeyLayout {
        KeyLayout::new(self.key_prefix.clone())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_name(self.worker_name.clone())
            .with_lanes(self.lanes.clone())
            .with_idle_interval(self.idle_interval)
            .with_recovery_interval(self.recovery_interval)
    }
}

fn millis(var: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_millis(default));
    };
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::new(var, format!("'{raw}' is not a millisecond count: {e}")))
}

fn default_worker_name() -> String {
    format!("worker-{}", uuid::Uuid::now_v7().simple())
}
