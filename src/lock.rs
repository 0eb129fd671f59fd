//! Advisory lock serialising writers of one destination path.
//!
//! The lock file `.<name>.pour-lock` sits next to the destination and is left
//! in place after release. Waiting sleeps the calling thread, so call this
//! from a blocking worker.

use crate::error::{FsError, PourError};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive lock on a destination, released on drop.
#[derive(Debug)]
pub struct DestinationLock {
    file: File,
    path: PathBuf,
}

/// Lock file guarding `destination`.
pub fn lock_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "binary".to_string());
    let dir = destination.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{name}.pour-lock"))
}

impl DestinationLock {
    /// Wait until the exclusive lock for `destination` is held, or `cancel` fires.
    ///
    /// The parent directory must already exist.
    pub fn acquire(destination: &Path, cancel: &CancellationToken) -> Result<Self, PourError> {
        let path = lock_path(destination);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| FsError::new("open lock file", &path, e))?;

        let mut waiting = false;
        loop {
            if cancel.is_cancelled() {
                tracing::info!("cancelled while waiting for lock {}", path.display());
                return Err(PourError::Cancelled);
            }
            match FileExt::try_lock_exclusive(&file) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(FsError::new("lock", &path, e).into()),
            }
            if !waiting {
                tracing::debug!("waiting for lock {}", path.display());
                waiting = true;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        tracing::debug!("acquired lock {}", path.display());

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DestinationLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
