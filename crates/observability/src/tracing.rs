//! Tracing/logging initialization.
//!
//! JSON lines by default so log shippers can index the structured fields
//! (`worker`, `lane`, `job_id`, `error`). `LOG_FORMAT=pretty` switches to
//! human-readable output for local runs.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT: &str = "LOG_FORMAT";

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}' (expected json or pretty)")),
        }
    }
}

impl LogFormat {
    /// Read `LOG_FORMAT`; unset or unrecognized values fall back to JSON.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(LogFormat::from_env());
}

/// Initialize with an explicit format. Filtering still comes from `RUST_LOG`
/// (default `info`).
pub fn init_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .with_target(false)
            .try_init(),
    };
}
