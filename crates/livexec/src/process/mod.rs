//! Interpreter process supervision
//!
//! Building the interpreter command line (with its timeout guard), spawning
//! and terminating the process group, and the scratch files programs are
//! persisted to.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::process::child::{InterpreterProcess, StdinMode, classify};
pub use crate::process::command::InterpreterCommand;
pub use crate::process::scratch::ScratchFile;

mod child;
mod command;
mod scratch;

/// Errors that occur while supervising an interpreter process
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn interpreter process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("command '{0}' not found in PATH")]
    ProgramNotFound(String),

    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("failed to write scratch file {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve a program name to an absolute path using the host's PATH.
///
/// Names that already contain a `/` are checked for existence as given.
pub fn resolve_program(program: &str) -> Result<PathBuf, ProcessError> {
    if program.contains('/') {
        let path = Path::new(program);
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(ProcessError::ProgramNotFound(program.to_string()))
        };
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(program);
        if candidate.is_file() {
            return Ok(std::fs::canonicalize(&candidate).unwrap_or(candidate));
        }
    }

    Err(ProcessError::ProgramNotFound(program.to_string()))
}
