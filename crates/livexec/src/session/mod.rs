//! Session management
//!
//! [`SessionManager`] is the front door: it persists submitted programs,
//! queues them for a slot, spawns the interpreter, registers the session and
//! hands it to a driver task that owns it until cleanup.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use livexec::{Config, SessionManager};
//!
//! let manager = SessionManager::new(Config::load(None)?);
//! let ticket = manager.submit(b"escreva 2").await?;
//! let mut channel = manager.attach(ticket.session_id)?;
//! while let Some(message) = channel.recv().await {
//!     println!("{}", message.render("[ERR] "));
//!     if message.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

pub use crate::session::registry::{Registry, RegistryError};

use crate::config::Config;
use crate::process::{InterpreterCommand, InterpreterProcess, ProcessError, ScratchFile, StdinMode};
use crate::session::admission::{Admission, AdmittedJob};
use crate::session::bridge::{DriverSettings, SessionDriver};
use crate::session::cleanup::Teardown;
use crate::session::registry::{AttachEnds, Registered, Registration};
use crate::types::{
    ManagerStatus, RunResult, ServerMessage, SessionId, SessionInfo, SessionState, SessionTicket,
    TerminalStatus,
};

mod admission;
mod batch;
mod bridge;
mod cleanup;
mod registry;

/// Errors from submitting a program
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no program was submitted")]
    EmptySource,

    #[error("submission queue is full ({max} waiting)")]
    QueueFull { max: usize },

    #[error("server is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Reasons a client cannot attach to a session
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("session {0} does not exist")]
    UnknownSession(SessionId),

    #[error("session {id} is no longer running ({state:?})")]
    NotRunning { id: SessionId, state: SessionState },

    #[error("session {0} already has a client")]
    AlreadyAttached(SessionId),

    #[error("session {0} does not accept clients")]
    NotAttachable(SessionId),

    #[error("session {0} ended while attaching")]
    Expired(SessionId),
}

impl AttachError {
    /// What the client is told before its channel is closed
    pub fn terminal(&self) -> TerminalStatus {
        TerminalStatus::InvalidSession
    }
}

/// Errors from a one-shot run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("time limit exceeded (the program did not finish within {seconds} seconds)")]
    Timeout { seconds: f64 },

    #[error("execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// The session side of a channel has gone away
#[derive(Debug, Error)]
#[error("session channel closed")]
pub struct ChannelClosed;

/// Client end of a session's duplex channel.
///
/// Messages arrive in the order the program produced them, and the last one
/// is always a [`ServerMessage::Terminal`]. Dropping the channel counts as
/// transport loss and cancels the session.
#[derive(Debug)]
pub struct SessionChannel {
    id: SessionId,
    input: mpsc::Sender<String>,
    output: mpsc::Receiver<ServerMessage>,
}

impl SessionChannel {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Send one line to the program's stdin
    pub async fn send_line(&self, line: impl Into<String>) -> Result<(), ChannelClosed> {
        self.input.send(line.into()).await.map_err(|_| ChannelClosed)
    }

    /// Next message from the session, `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.output.recv().await
    }

    /// Split into the input sender and output receiver
    pub fn into_parts(self) -> (mpsc::Sender<String>, mpsc::Receiver<ServerMessage>) {
        (self.input, self.output)
    }
}

#[derive(Debug)]
struct ManagerInner {
    config: Config,
    settings: DriverSettings,
    registry: Arc<Registry>,
    admission: Admission,
}

/// Entry point for submitting, attaching to and supervising sessions
#[derive(Debug, Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let settings = DriverSettings::from_config(&config);
        let registry = Arc::new(Registry::new(config.max_concurrent));
        let admission = Admission::new(config.max_concurrent, config.max_queued);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                settings,
                registry,
                admission,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Submit a program for interactive execution.
    ///
    /// Resolves once the program is running, which may mean waiting behind
    /// earlier submissions. The returned id is the one to attach with.
    #[instrument(skip_all, fields(len = source.len()))]
    pub async fn submit(&self, source: &[u8]) -> Result<SessionTicket, SubmitError> {
        let admitted = self.admit(source).await?;
        let (sequence, queued_for) = (admitted.sequence, admitted.queued_for);
        let (registered, process, teardown) = self.start(admitted, StdinMode::Piped)?;
        let id = registered.id;

        SessionDriver {
            id,
            process,
            teardown,
            attach: registered.attach,
            cancel: registered.cancel,
            settings: self.inner.settings.clone(),
        }
        .spawn();

        let queued_ms = queued_for.as_millis() as u64;
        info!(session = %id, sequence, queued_ms, "session started");
        Ok(SessionTicket {
            session_id: id,
            sequence,
            queued_ms,
        })
    }

    /// Attach the single client of a running session
    #[instrument(skip(self))]
    pub fn attach(&self, id: SessionId) -> Result<SessionChannel, AttachError> {
        let sender = self.inner.registry.take_attachment(id)?;
        let buffer = self.inner.config.channel.buffer;
        let (input_tx, input_rx) = mpsc::channel(buffer);
        let (output_tx, output_rx) = mpsc::channel(buffer);
        sender
            .send(AttachEnds {
                input: input_rx,
                output: output_tx,
            })
            .map_err(|_| AttachError::Expired(id))?;
        Ok(SessionChannel {
            id,
            input: input_tx,
            output: output_rx,
        })
    }

    /// Run a program to completion and collect its output
    #[instrument(skip_all, fields(len = source.len()))]
    pub async fn run(&self, source: &[u8]) -> Result<RunResult, RunError> {
        let admitted = self.admit(source).await?;
        let (registered, process, teardown) = self.start(admitted, StdinMode::Closed)?;
        debug!(session = %registered.id, "one-shot run started");
        batch::run_to_completion(process, teardown, registered.cancel, &self.inner.settings).await
    }

    /// Ask a running session to stop
    pub fn cancel(&self, id: SessionId) -> bool {
        self.inner.registry.cancel(id)
    }

    pub fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.inner.registry.lookup(id)
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            running: self.inner.registry.running(),
            queued: self.inner.admission.queued(),
            capacity: self.inner.admission.capacity(),
            peak_running: self.inner.registry.peak_running(),
        }
    }

    /// Stop accepting work, cancel every session and wait for cleanup.
    ///
    /// Returns `false` if sessions were still registered when `grace` ran
    /// out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.admission.close();
        let cancelled = self.inner.registry.cancel_all();
        info!(cancelled, "shutting down sessions");

        let registry = &self.inner.registry;
        let drained = tokio::time::timeout(grace, async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(remaining = registry.len(), "sessions still running at shutdown");
        }
        drained
    }

    /// Persist the program and wait for a slot
    async fn admit(&self, source: &[u8]) -> Result<AdmittedJob, SubmitError> {
        if source.is_empty() {
            return Err(SubmitError::EmptySource);
        }
        let config = &self.inner.config;
        let scratch =
            ScratchFile::create(&config.scratch_dir(), &config.interpreter.extension, source)
                .await?;
        let job = self.inner.admission.enqueue(scratch)?;
        self.inner.admission.admit(job).await
    }

    /// Spawn the interpreter for an admitted job and register it
    fn start(
        &self,
        admitted: AdmittedJob,
        stdin: StdinMode,
    ) -> Result<(Registered, InterpreterProcess, Teardown), SubmitError> {
        let AdmittedJob {
            sequence,
            scratch,
            permit,
            ..
        } = admitted;

        let command = InterpreterCommand::from_config(&self.inner.config, scratch.path());
        let process = InterpreterProcess::spawn(command, stdin)?;
        let registered = self.inner.registry.insert(Registration {
            sequence,
            pid: process.id(),
            interactive: stdin == StdinMode::Piped,
            permit,
        })?;
        let teardown = Teardown::new(registered.id, self.inner.registry.clone(), scratch);
        Ok((registered, process, teardown))
    }
}
