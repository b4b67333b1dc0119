//! Interpreter process handle
//!
//! Spawns the interpreter in its own process group so that termination
//! reaches the guard, the interpreter, and anything the program forked.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument, warn};

use crate::process::{InterpreterCommand, ProcessError};
use crate::types::ExitOutcome;

/// How the process's stdin is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    /// Piped, for interactive sessions
    Piped,
    /// At EOF from the start
    Closed,
}

/// Process handle for one interpreter run
#[derive(Debug)]
pub struct InterpreterProcess {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    /// Set once the child has been reaped
    status: Option<ExitStatus>,
    started: Instant,
}

impl InterpreterProcess {
    /// Spawn the interpreter
    #[instrument(skip(command))]
    pub fn spawn(command: InterpreterCommand, stdin: StdinMode) -> Result<Self, ProcessError> {
        let envs = command.envs().clone();
        let args = command.build();
        let program = args.first().ok_or(ProcessError::EmptyCommand)?;

        debug!(?args, "spawning interpreter");

        let mut child = Command::new(program)
            .args(&args[1..])
            .envs(&envs)
            .stdin(match stdin {
                StdinMode::Piped => Stdio::piped(),
                StdinMode::Closed => Stdio::null(),
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(ProcessError::SpawnFailed)?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        debug!(?pid, "interpreter started");

        Ok(Self {
            child,
            pid,
            stdin,
            stdout,
            stderr,
            status: None,
            started: Instant::now(),
        })
    }

    /// OS process id (also the process group id)
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Time since the process was spawned
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Take ownership of stdin
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take ownership of stdout
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take ownership of stderr
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Non-blocking check: has the process terminated, and how
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.status = status;
        }
        Ok(status)
    }

    /// Whether the process has been reaped
    pub fn has_exited(&self) -> bool {
        self.status.is_some()
    }

    /// Wait for the process to exit on its own
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        self.stdin = None;
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(status)
    }

    /// Kill the process group and reap the child.
    ///
    /// Idempotent: once the child has been reaped this returns the recorded
    /// status without signalling anything.
    #[instrument(skip(self), fields(pid = ?self.pid))]
    pub async fn terminate(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        self.stdin = None;

        // The leader is not reaped yet, so its pid cannot have been recycled
        // and still names our group.
        if let Err(e) = self.kill_group() {
            warn!(error = %e, "process group kill failed, killing leader only");
            if let Err(e) = self.child.start_kill() {
                debug!(error = %e, "leader already gone");
            }
        }

        let status = self.child.wait().await?;
        self.status = Some(status);
        debug!(?status, "interpreter terminated");
        Ok(status)
    }

    fn kill_group(&self) -> Result<(), ProcessError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pgid = pid as i32;
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::Signal { pgid, source }),
        }
    }
}

impl Drop for InterpreterProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            // kill_on_drop only reaches the leader; take the whole group down.
            if let Err(e) = self.kill_group() {
                warn!(pid = ?self.pid, error = %e, "failed to kill process group on drop");
            }
        }
    }
}

/// Classify an exit status into a session outcome
pub fn classify(status: ExitStatus, timeout_exit_code: i32, budget_exhausted: bool) -> ExitOutcome {
    ExitOutcome::from_exit(
        status.code(),
        status.signal(),
        timeout_exit_code,
        budget_exhausted,
    )
}
