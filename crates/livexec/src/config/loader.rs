//! Configuration file loading for livexec
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the effective configuration: the given file (or the embedded
    /// example when there is none), then `LIVEXEC__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(path) => ConfigBuilder::builder().add_source(File::from(path)),
            None => ConfigBuilder::builder()
                .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml)),
        };
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("interpreter.args")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if !(self.time_limit.is_finite() && self.time_limit > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "time_limit must be a positive number of seconds, got {}",
                self.time_limit
            )));
        }
        if !(self.attach_timeout.is_finite() && self.attach_timeout > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "attach_timeout must be a positive number of seconds, got {}",
                self.attach_timeout
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.interpreter.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter has empty program".to_string(),
            ));
        }
        if self.interpreter.extension.is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter has empty extension".to_string(),
            ));
        }
        if self.guard.enabled {
            if self.guard.program.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "guard is enabled but has empty program".to_string(),
                ));
            }
            if !(self.guard.kill_after.is_finite() && self.guard.kill_after >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "guard kill_after must be non-negative, got {}",
                    self.guard.kill_after
                )));
            }
        }
        if self.channel.sentinel.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "channel sentinel must not be blank".to_string(),
            ));
        }
        if self.channel.buffer == 0 {
            return Err(ConfigError::Invalid(
                "channel buffer must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
