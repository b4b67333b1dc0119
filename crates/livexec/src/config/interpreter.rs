use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// The external interpreter every submission is run with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Executable name or path (e.g., "potigol")
    pub program: String,

    /// Arguments placed before the scratch file path
    #[serde(default)]
    pub args: Vec<String>,

    /// Extension given to scratch files
    pub extension: FileExtension,

    /// Extra environment variables for the interpreter
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// File extension without dot (e.g., "poti")
#[derive(Debug, Clone, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External timeout guard wrapped around the interpreter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_guard_enabled")]
    pub enabled: bool,

    /// Guard executable, invoked as `<program> --kill-after=<kill_after> <time_limit> ...`
    #[serde(default = "default_guard_program")]
    pub program: String,

    /// Seconds between the polite signal and SIGKILL
    #[serde(default = "default_kill_after")]
    pub kill_after: f64,

    /// Exit status the guard reserves for a timeout kill
    #[serde(default = "default_timeout_exit_code")]
    pub timeout_exit_code: i32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: default_guard_enabled(),
            program: default_guard_program(),
            kill_after: default_kill_after(),
            timeout_exit_code: default_timeout_exit_code(),
        }
    }
}

/// Duplex channel conventions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Client line that cancels the session
    #[serde(default = "default_sentinel")]
    pub sentinel: String,

    /// Marker prepended to stderr lines
    #[serde(default = "default_stderr_prefix")]
    pub stderr_prefix: String,

    /// Output events buffered per session
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl ChannelConfig {
    /// Whether a client line is the cancellation sentinel.
    ///
    /// Comparison ignores surrounding whitespace and ASCII case.
    pub fn is_sentinel(&self, line: &str) -> bool {
        line.trim().eq_ignore_ascii_case(self.sentinel.trim())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
            stderr_prefix: default_stderr_prefix(),
            buffer: default_buffer(),
        }
    }
}

fn default_guard_enabled() -> bool {
    true
}

fn default_guard_program() -> String {
    "timeout".to_string()
}

fn default_kill_after() -> f64 {
    2.0
}

fn default_timeout_exit_code() -> i32 {
    124
}

fn default_sentinel() -> String {
    "exit".to_string()
}

fn default_stderr_prefix() -> String {
    "[ERR] ".to_string()
}

fn default_buffer() -> usize {
    256
}
