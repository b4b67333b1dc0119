//! Scratch files holding submitted programs

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::FileExtension;
use crate::process::ProcessError;

/// A uniquely named file holding one submitted program.
///
/// Removed by [`remove()`](Self::remove) during session cleanup. If the
/// value is dropped first (a queued submission whose request went away, a
/// failed spawn, an aborted task) the file is removed synchronously on drop.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    removed: bool,
}

impl ScratchFile {
    /// Persist `content` to a new file in `dir`
    #[instrument(skip(content), fields(len = content.len()))]
    pub async fn create(
        dir: &Path,
        extension: &FileExtension,
        content: &[u8],
    ) -> Result<Self, ProcessError> {
        let path = dir.join(format!("livexec-{}.{}", Uuid::new_v4(), extension));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| ProcessError::Scratch {
                path: path.clone(),
                source,
            })?;

        // From here on the guard owns the path, so a failed write cleans up.
        let scratch = Self {
            path,
            removed: false,
        };

        let written = async {
            file.write_all(content).await?;
            file.flush().await
        }
        .await;
        if let Err(source) = written {
            return Err(ProcessError::Scratch {
                path: scratch.path.clone(),
                source,
            });
        }

        debug!(path = %scratch.path.display(), "wrote scratch file");
        Ok(scratch)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file.
    ///
    /// Returns `Ok(true)` if this call deleted it and `Ok(false)` if it was
    /// already gone. Calling it again after success is a no-op.
    pub async fn remove(&mut self) -> Result<bool, std::io::Error> {
        if self.removed {
            return Ok(false);
        }
        let deleted = match tokio::fs::remove_file(&self.path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };
        self.removed = true;
        debug!(path = %self.path.display(), deleted, "scratch file removed");
        Ok(deleted)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "scratch file removed on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove scratch file on drop"
            ),
        }
    }
}
