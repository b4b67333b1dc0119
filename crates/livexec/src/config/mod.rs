use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::interpreter::{ChannelConfig, FileExtension, GuardConfig, InterpreterConfig};

pub mod interpreter;
mod loader;

/// Example configuration embedded at compile time.
///
/// Also the source of [`Config::default`], so the shipped example and the
/// built-in defaults can never drift apart.
pub const EXAMPLE_CONFIG: &str = include_str!("../../livexec.example.toml");

/// Prefix for environment variable overrides (`LIVEXEC__MAX_CONCURRENT=8`).
pub const ENV_PREFIX: &str = "LIVEXEC";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for livexec
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the server listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Maximum number of sessions in the RUNNING state at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Maximum number of submissions waiting for a slot. `None` means unbounded.
    #[serde(default)]
    pub max_queued: Option<usize>,

    /// Wall-clock budget per execution in seconds.
    #[serde(default = "default_time_limit")]
    pub time_limit: f64,

    /// Seconds a started session waits for a client before it is cancelled.
    #[serde(default = "default_attach_timeout")]
    pub attach_timeout: f64,

    /// Interval between non-blocking process status checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on relaying leftover output once the process has exited.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Where scratch program files are written. Defaults to the OS temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    pub interpreter: InterpreterConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub channel: ChannelConfig,
}

impl Config {
    /// Create a new config with the embedded defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall-clock budget as a duration
    pub fn time_limit(&self) -> Duration {
        seconds(self.time_limit)
    }

    pub fn attach_timeout(&self) -> Duration {
        seconds(self.attach_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Point past which the supervisor kills a process itself.
    ///
    /// With the guard enabled this leaves the guard its full escalation
    /// window plus one second, so the guard's exit code is normally what
    /// reports the timeout.
    pub fn backstop_deadline(&self) -> Duration {
        if self.guard.enabled {
            self.time_limit() + seconds(self.guard.kill_after) + Duration::from_secs(1)
        } else {
            self.time_limit()
        }
    }

    /// Directory scratch files are written to
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

pub(crate) fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_time_limit() -> f64 {
    30.0
}

fn default_attach_timeout() -> f64 {
    30.0
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_drain_timeout_ms() -> u64 {
    500
}
