//! Session teardown
//!
//! Every session, whatever ended it, goes through [`Teardown`] exactly once:
//! kill the process group, tell the client, delete the scratch file, drop
//! the registry entry, close the channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::process::{InterpreterProcess, ScratchFile};
use crate::session::registry::Registry;
use crate::types::{ExitOutcome, ServerMessage, SessionId};

/// Owns the resources released when a session ends
#[derive(Debug)]
pub(crate) struct Teardown {
    id: SessionId,
    registry: Arc<Registry>,
    scratch: ScratchFile,
    done: bool,
}

impl Teardown {
    pub(crate) fn new(id: SessionId, registry: Arc<Registry>, scratch: ScratchFile) -> Self {
        Self {
            id,
            registry,
            scratch,
            done: false,
        }
    }

    /// Record the terminal state.
    ///
    /// Called before anything is released so that no client can attach to
    /// a session that is on its way out. Returns `false` if the session had
    /// already left RUNNING.
    pub(crate) fn begin(&self, outcome: &ExitOutcome) -> bool {
        let first = self.registry.mark_terminal(self.id, outcome.state());
        if !first {
            debug!(session = %self.id, ?outcome, "session already terminal");
        }
        first
    }

    /// Release everything the session holds.
    ///
    /// Failures are logged and never stop the later steps.
    pub(crate) async fn finish(
        mut self,
        process: &mut InterpreterProcess,
        outcome: ExitOutcome,
        client: Option<mpsc::Sender<ServerMessage>>,
    ) {
        if let Err(e) = process.terminate().await {
            warn!(session = %self.id, error = %e, "failed to terminate interpreter");
        }

        if let Some(client) = &client {
            let terminal = ServerMessage::Terminal(outcome.terminal());
            if client.send(terminal).await.is_err() {
                debug!(session = %self.id, "client gone before terminal message");
            }
        }

        if let Err(e) = self.scratch.remove().await {
            warn!(
                session = %self.id,
                path = %self.scratch.path().display(),
                error = %e,
                "failed to remove scratch file"
            );
        }

        self.registry.remove(self.id);
        self.done = true;

        drop(client);
        debug!(session = %self.id, ?outcome, "session cleaned up");
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // The driver went away mid-session. The scratch file and the process
        // group are released by their own drops.
        warn!(session = %self.id, "session dropped before cleanup");
        self.registry.remove(self.id);
    }
}
