//! Session registry
//!
//! The single table of live sessions. Every mutation, including the
//! running-count bookkeeping admission relies on, happens under one mutex
//! that is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, mpsc, oneshot};
use tracing::{debug, info};

use crate::session::AttachError;
use crate::types::{ServerMessage, SessionId, SessionInfo, SessionState};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("admission would exceed the capacity of {capacity} running sessions")]
    CapacityExceeded { capacity: usize },
}

/// The session's side of an attached duplex channel
#[derive(Debug)]
pub(crate) struct AttachEnds {
    pub(crate) input: mpsc::Receiver<String>,
    pub(crate) output: mpsc::Sender<ServerMessage>,
}

/// What admission hands the registry for a newly spawned process
#[derive(Debug)]
pub(crate) struct Registration {
    pub(crate) sequence: u64,
    pub(crate) pid: Option<u32>,
    /// Interactive sessions accept one client; one-shot runs accept none
    pub(crate) interactive: bool,
    pub(crate) permit: OwnedSemaphorePermit,
}

/// Handles the session driver keeps after registration
#[derive(Debug)]
pub(crate) struct Registered {
    pub(crate) id: SessionId,
    pub(crate) attach: oneshot::Receiver<AttachEnds>,
    pub(crate) cancel: Arc<Notify>,
}

#[derive(Debug)]
struct SessionEntry {
    info: SessionInfo,
    interactive: bool,
    attach: Option<oneshot::Sender<AttachEnds>>,
    cancel: Arc<Notify>,
    /// Admission slot, released when the entry is removed
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, SessionEntry>,
    last_id: u64,
    running: usize,
    peak_running: usize,
}

/// Authoritative mapping from session id to session state
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a freshly spawned session in the RUNNING state and assign its id
    pub(crate) fn insert(&self, registration: Registration) -> Result<Registered, RegistryError> {
        let mut inner = self.lock();
        if inner.running >= self.capacity {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        inner.last_id += 1;
        let id = SessionId(inner.last_id);
        inner.running += 1;
        inner.peak_running = inner.peak_running.max(inner.running);

        let (attach_tx, attach_rx) = oneshot::channel();
        let cancel = Arc::new(Notify::new());
        let entry = SessionEntry {
            info: SessionInfo {
                id,
                state: SessionState::Running,
                sequence: registration.sequence,
                pid: registration.pid,
                created_at: SystemTime::now(),
                attachable: registration.interactive,
            },
            interactive: registration.interactive,
            attach: registration.interactive.then_some(attach_tx),
            cancel: cancel.clone(),
            _permit: registration.permit,
        };
        inner.sessions.insert(id, entry);

        info!(
            session = %id,
            running = inner.running,
            capacity = self.capacity,
            "session running"
        );

        Ok(Registered {
            id,
            attach: attach_rx,
            cancel,
        })
    }

    /// Look up a session by id
    pub fn lookup(&self, id: SessionId) -> Option<SessionInfo> {
        self.lock().sessions.get(&id).map(|entry| entry.info.clone())
    }

    /// Claim the right to attach a client.
    ///
    /// Succeeds at most once per session and only while it is RUNNING.
    pub(crate) fn take_attachment(
        &self,
        id: SessionId,
    ) -> Result<oneshot::Sender<AttachEnds>, AttachError> {
        let mut inner = self.lock();
        let entry = inner
            .sessions
            .get_mut(&id)
            .ok_or(AttachError::UnknownSession(id))?;

        if entry.info.state != SessionState::Running {
            return Err(AttachError::NotRunning {
                id,
                state: entry.info.state,
            });
        }
        if !entry.interactive {
            return Err(AttachError::NotAttachable(id));
        }
        let sender = entry.attach.take().ok_or(AttachError::AlreadyAttached(id))?;
        entry.info.attachable = false;
        debug!(session = %id, "client attached");
        Ok(sender)
    }

    /// Record the first terminal transition of a session.
    ///
    /// Returns `false` if the session is unknown or already left RUNNING.
    pub(crate) fn mark_terminal(&self, id: SessionId, state: SessionState) -> bool {
        debug_assert!(state.is_terminal());
        let mut inner = self.lock();
        let Some(entry) = inner.sessions.get_mut(&id) else {
            return false;
        };
        if entry.info.state != SessionState::Running {
            return false;
        }
        entry.info.state = state;
        entry.info.attachable = false;
        inner.running -= 1;
        info!(session = %id, ?state, running = inner.running, "session ended");
        true
    }

    /// Remove a session, releasing its admission slot
    pub(crate) fn remove(&self, id: SessionId) -> Option<SessionInfo> {
        let mut inner = self.lock();
        let entry = inner.sessions.remove(&id)?;
        if entry.info.state == SessionState::Running {
            inner.running -= 1;
        }
        debug!(session = %id, remaining = inner.sessions.len(), "session removed");
        let mut info = entry.info.clone();
        info.state = SessionState::Removed;
        Some(info)
    }

    /// Ask a running session to cancel itself
    pub fn cancel(&self, id: SessionId) -> bool {
        let inner = self.lock();
        match inner.sessions.get(&id) {
            Some(entry) if entry.info.state == SessionState::Running => {
                entry.cancel.notify_one();
                true
            }
            _ => false,
        }
    }

    /// Cancel every running session, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let inner = self.lock();
        inner
            .sessions
            .values()
            .filter(|entry| entry.info.state == SessionState::Running)
            .inspect(|entry| entry.cancel.notify_one())
            .count()
    }

    /// Number of sessions currently RUNNING
    pub fn running(&self) -> usize {
        self.lock().running
    }

    /// Highest number of sessions ever RUNNING at once
    pub fn peak_running(&self) -> usize {
        self.lock().peak_running
    }

    /// Number of entries, including sessions between ending and removal
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }
}
