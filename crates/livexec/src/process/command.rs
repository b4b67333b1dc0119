//! Command builder for interpreter invocations
//!
//! Produces the argument vector for running one scratch file, optionally
//! wrapped in the external timeout guard.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, GuardConfig};

/// Builder for an interpreter command line
#[derive(Debug, Clone)]
pub struct InterpreterCommand {
    program: String,
    args: Vec<String>,
    script: Option<PathBuf>,
    env: HashMap<String, String>,
    /// Guard program, kill-after grace and budget
    guard: Option<(String, Duration, Duration)>,
}

impl InterpreterCommand {
    /// Create a new command for the given interpreter program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            script: None,
            env: HashMap::new(),
            guard: None,
        }
    }

    /// Build the command for running `script` under the given configuration
    pub fn from_config(config: &Config, script: impl Into<PathBuf>) -> Self {
        let mut command = Self::new(&config.interpreter.program)
            .args(config.interpreter.args.iter().cloned())
            .script(script);
        for (key, value) in &config.interpreter.env {
            command = command.env(key, value);
        }
        if config.guard.enabled {
            command = command.guard(&config.guard, config.time_limit());
        }
        command
    }

    /// Add arguments placed before the script path
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the program file handed to the interpreter
    pub fn script(mut self, path: impl Into<PathBuf>) -> Self {
        self.script = Some(path.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Wrap the interpreter in the timeout guard
    pub fn guard(mut self, guard: &GuardConfig, budget: Duration) -> Self {
        self.guard = Some((
            guard.program.clone(),
            crate::config::seconds(guard.kill_after),
            budget,
        ));
        self
    }

    /// Environment variables to set on the process
    pub fn envs(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the argument vector.
    pub fn build(self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some((program, kill_after, budget)) = self.guard {
            args.push(program);
            args.push(format!("--kill-after={}", format_seconds(kill_after)));
            args.push(format_seconds(budget));
        }

        args.push(self.program);
        args.extend(self.args);

        if let Some(script) = self.script {
            args.push(script.to_string_lossy().into_owned());
        }

        args
    }
}

/// Seconds in the form coreutils `timeout` accepts (`30`, `0.5`)
fn format_seconds(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", duration.as_secs())
    } else {
        format!("{secs}")
    }
}
