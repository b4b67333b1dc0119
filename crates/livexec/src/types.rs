use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identifier of an admitted session.
///
/// Assigned by the registry at admission, never before, and never reused
/// within one server lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Parse an identifier as it appears in a URL path segment
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok().map(SessionId)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for a slot; never visible in the registry
    Queued,
    Running,
    Finished,
    TimedOut,
    Cancelled,
    Errored,
    Removed,
}

impl SessionState {
    /// Whether the state is one of the four terminal outcomes
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Finished
                | SessionState::TimedOut
                | SessionState::Cancelled
                | SessionState::Errored
        )
    }
}

/// Why a cancelled session was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The client sent the sentinel line
    Sentinel,
    /// The duplex channel went away
    TransportLost,
    /// Cancelled through the manager (API call or shutdown)
    Requested,
    /// Nobody attached within the attach timeout
    NeverAttached,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit code 0
    Finished,
    /// Killed for exceeding the wall-clock budget
    TimedOut,
    /// Non-zero exit or death by signal
    Errored { code: Option<i32>, signal: Option<i32> },
    Cancelled(CancelReason),
}

impl ExitOutcome {
    /// Exit status `128 + SIGKILL`, as reported by the guard when it escalated
    pub const KILLED_STATUS: i32 = 137;

    const SIGKILL: i32 = 9;

    /// Classify a process exit.
    ///
    /// `budget_exhausted` tells whether the wall-clock budget had already
    /// elapsed when the exit was observed; it only matters for SIGKILL
    /// deaths, which the guard produces when the program ignores the
    /// polite signal.
    pub fn from_exit(
        code: Option<i32>,
        signal: Option<i32>,
        timeout_exit_code: i32,
        budget_exhausted: bool,
    ) -> Self {
        if code == Some(timeout_exit_code) {
            return ExitOutcome::TimedOut;
        }
        let killed = code == Some(Self::KILLED_STATUS) || signal == Some(Self::SIGKILL);
        if killed && budget_exhausted {
            return ExitOutcome::TimedOut;
        }
        match code {
            Some(0) => ExitOutcome::Finished,
            _ => ExitOutcome::Errored { code, signal },
        }
    }

    /// Registry state this outcome moves the session to
    pub fn state(&self) -> SessionState {
        match self {
            ExitOutcome::Finished => SessionState::Finished,
            ExitOutcome::TimedOut => SessionState::TimedOut,
            ExitOutcome::Errored { .. } => SessionState::Errored,
            ExitOutcome::Cancelled(_) => SessionState::Cancelled,
        }
    }

    /// Terminal message reported to the client
    pub fn terminal(&self) -> TerminalStatus {
        match self {
            // A runtime error is not a protocol failure: the client already
            // saw the program's stderr.
            ExitOutcome::Finished | ExitOutcome::Errored { .. } => TerminalStatus::Finished,
            ExitOutcome::TimedOut => TerminalStatus::TimedOut,
            ExitOutcome::Cancelled(_) => TerminalStatus::Cancelled,
        }
    }
}

/// The single final status line of a duplex channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Finished,
    TimedOut,
    Cancelled,
    InvalidSession,
}

impl TerminalStatus {
    pub fn message(&self) -> &'static str {
        match self {
            TerminalStatus::Finished => "[END] execution finished",
            TerminalStatus::TimedOut => "[TIMEOUT] time limit exceeded (possible infinite loop)",
            TerminalStatus::Cancelled => "[CANCELLED] execution cancelled by user",
            TerminalStatus::InvalidSession => "[INVALID] invalid or expired session",
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A message travelling from a session to its client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Stdout(String),
    Stderr(String),
    Terminal(TerminalStatus),
}

impl ServerMessage {
    /// Render as one text line for the wire
    pub fn render(&self, stderr_prefix: &str) -> String {
        match self {
            ServerMessage::Stdout(line) => line.clone(),
            ServerMessage::Stderr(line) => format!("{stderr_prefix}{line}"),
            ServerMessage::Terminal(status) => status.message().to_string(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::Terminal(_))
    }
}

/// Public view of a registry entry
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    /// Sequence number the job drew in the admission line
    pub sequence: u64,
    pub pid: Option<u32>,
    pub created_at: SystemTime,
    /// Whether a client can still attach (interactive and not yet attached)
    pub attachable: bool,
}

/// Returned by a successful submission, once the process is running
#[derive(Debug, Clone, Serialize)]
pub struct SessionTicket {
    pub session_id: SessionId,
    pub sequence: u64,
    /// Time spent waiting for a slot, in milliseconds
    pub queued_ms: u64,
}

/// Result of a one-shot run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or `None` if the interpreter died from a signal
    pub exit_code: Option<i32>,
}

impl RunResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Point-in-time admission figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    pub running: usize,
    pub queued: usize,
    pub capacity: usize,
    /// Highest number of sessions ever RUNNING at once
    pub peak_running: usize,
}
