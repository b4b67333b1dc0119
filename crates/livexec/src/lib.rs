//! A library for supervised, interactive execution of submitted programs.
//!
//! livexec runs untrusted programs through an external interpreter and lets
//! one client talk to each running program over a line-oriented duplex
//! channel. It admits a bounded number of executions at once, queues the
//! rest in arrival order, enforces a wall-clock budget, and guarantees that
//! every session is torn down exactly once.
//!
//! # Features
//!
//! - **Admission control** — A fixed number of concurrent executions with a FIFO queue behind it.
//! - **Process supervision** — Each run gets its own process group, killed as a whole.
//! - **Timeout guard** — Optional wrapping in coreutils `timeout`, with an in-process backstop.
//! - **Live streaming** — stdout and stderr relayed line by line as they are produced.
//! - **Exactly-once cleanup** — Process, scratch file, registry entry and channel all released together.
//! - **One-shot runs** — Run to completion and collect output without a live client.

pub use config::{ChannelConfig, Config, ConfigError, EXAMPLE_CONFIG, GuardConfig, InterpreterConfig};
pub use process::{InterpreterCommand, InterpreterProcess, ProcessError, ScratchFile, StdinMode};
pub use session::{
    AttachError, ChannelClosed, Registry, RegistryError, RunError, SessionChannel, SessionManager,
    SubmitError,
};
pub use types::{
    CancelReason, ExitOutcome, ManagerStatus, OutputStream, RunResult, ServerMessage, SessionId,
    SessionInfo, SessionState, SessionTicket, TerminalStatus,
};

pub mod config;
pub mod process;
pub mod session;
pub mod types;
