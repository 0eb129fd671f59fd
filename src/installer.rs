//! Resolve, fetch, verify and atomically publish one binary.
//!
//! ```text
//! Resolving -> Fetching -> Verifying -> Publishing -> Done
//!      \___________\___________\____________\______> Failed{stage, cause}
//! ```
//!
//! The destination path only ever holds a complete binary: either the one that
//! was there before the run or the newly verified one. New bytes are written to
//! a temporary file in the destination directory and renamed over the
//! destination while holding the [`DestinationLock`].

use crate::catalog::{Channel, ReleaseEntry, ResolveError, VersionCatalog};
use crate::checksum::{self, Sha256Digest, sha256_file};
use crate::download::ArtifactFetcher;
use crate::error::{FsError, PourError};
use crate::lock::DestinationLock;
use crate::platform::Platform;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Permissions of a published binary.
#[cfg(unix)]
const INSTALL_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolving,
    Fetching,
    Verifying,
    Publishing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolving => "resolving",
            Stage::Fetching => "fetching",
            Stage::Verifying => "verifying",
            Stage::Publishing => "publishing",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Which release to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRequest {
    Exact(String),
    /// Whatever the catalog's `latest` pointer for the channel names.
    Latest(Channel),
}

impl VersionRequest {
    /// `latest` (any case) follows the catalog pointer; anything else is exact.
    pub fn parse(version: &str, prerelease: bool) -> Self {
        if version.trim().eq_ignore_ascii_case("latest") {
            let channel = if prerelease {
                Channel::Prerelease
            } else {
                Channel::Stable
            };
            VersionRequest::Latest(channel)
        } else {
            VersionRequest::Exact(version.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub version: VersionRequest,
    pub platform: Platform,
    pub destination_dir: PathBuf,
    /// Re-download even when the destination already holds this release.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    /// Nothing was at the destination before.
    Installed,
    /// A different file was atomically replaced.
    Replaced,
    /// The destination already matched the release digest; nothing fetched.
    AlreadyInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledBinary {
    pub path: PathBuf,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub binary: InstalledBinary,
    pub status: InstallStatus,
    pub platform: Platform,
    pub url: String,
    pub sha256: Sha256Digest,
    /// Download attempts made, 0 when nothing was fetched.
    pub fetch_attempts: u32,
    /// Stages entered, in order.
    pub stages: Vec<Stage>,
}

/// Terminal failure, tagged with the stage it happened in.
#[derive(Error, Debug)]
#[error("{stage} failed: {cause}")]
pub struct InstallError {
    pub stage: Stage,
    #[source]
    pub cause: PourError,
}

impl InstallError {
    pub fn new(stage: Stage, cause: impl Into<PourError>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.cause.exit_code()
    }
}

fn failed<E: Into<PourError>>(stage: Stage) -> impl FnOnce(E) -> InstallError {
    move |cause| InstallError::new(stage, cause)
}

pub struct Installer<F> {
    catalog: VersionCatalog,
    fetcher: F,
    cancel: CancellationToken,
}

impl<F: ArtifactFetcher> Installer<F> {
    pub fn new(catalog: VersionCatalog, fetcher: F) -> Self {
        Self {
            catalog,
            fetcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight work when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Final path of the binary inside `dir`.
    pub fn destination(&self, dir: &Path) -> PathBuf {
        dir.join(self.catalog.binary())
    }

    pub fn resolve(
        &self,
        version: &VersionRequest,
        platform: Platform,
    ) -> Result<&ReleaseEntry, ResolveError> {
        match version {
            VersionRequest::Exact(version) => self.catalog.resolve(version, platform),
            VersionRequest::Latest(channel) => self.catalog.resolve_channel(*channel, platform),
        }
    }

    /// Run the install state machine to `Done` or a stage-tagged failure.
    pub async fn install(&self, request: &InstallRequest) -> Result<InstallReport, InstallError> {
        let mut stages = Vec::with_capacity(5);

        enter(&mut stages, Stage::Resolving);
        if self.cancel.is_cancelled() {
            return Err(InstallError::new(Stage::Resolving, PourError::Cancelled));
        }
        let entry = self
            .resolve(&request.version, request.platform)
            .map_err(failed(Stage::Resolving))?
            .clone();
        let destination = self.destination(&request.destination_dir);
        tracing::info!(
            "resolved {} {} for {} -> {}",
            self.catalog.binary(),
            entry.version,
            entry.platform,
            entry.url
        );

        let replacing = destination.symlink_metadata().is_ok();

        // Already installed: confirm the digest instead of downloading again
        if !request.force && destination.is_file() {
            let digest = hash_file(destination.clone())
                .await
                .map_err(failed(Stage::Verifying))?;
            let intact = entry.sha256.matches(&digest);
            if intact && has_install_mode(&destination) {
                enter(&mut stages, Stage::Verifying);
                enter(&mut stages, Stage::Done);
                tracing::info!("{} already holds {}", destination.display(), entry.version);
                return Ok(self.report(
                    entry,
                    destination,
                    InstallStatus::AlreadyInstalled,
                    0,
                    stages,
                ));
            }
            if intact {
                tracing::info!(
                    "{} holds {} but is not executable, reinstalling",
                    destination.display(),
                    entry.version
                );
            } else {
                tracing::info!(
                    "{} does not match {} (sha256 {}), reinstalling",
                    destination.display(),
                    entry.version,
                    digest
                );
            }
        }

        enter(&mut stages, Stage::Fetching);
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PourError::Cancelled),
            result = self.fetcher.fetch(&entry.url) => result.map_err(PourError::from),
        };
        let fetched = fetched.map_err(failed(Stage::Fetching))?;
        tracing::debug!(
            "fetched {} bytes from {} in {} attempt(s)",
            fetched.bytes.len(),
            fetched.source_url,
            fetched.attempts
        );

        enter(&mut stages, Stage::Verifying);
        let bytes = fetched.bytes;
        let expected = entry.sha256.clone();
        let verify_bytes = bytes.clone();
        tokio::task::spawn_blocking(move || checksum::verify(&verify_bytes, expected.as_str()))
            .await
            .map_err(failed(Stage::Verifying))?
            .map_err(failed(Stage::Verifying))?;

        enter(&mut stages, Stage::Publishing);
        let cancel = self.cancel.clone();
        let target = destination.clone();
        tokio::task::spawn_blocking(move || publish(&target, &bytes, &cancel))
            .await
            .map_err(failed(Stage::Publishing))?
            .map_err(failed(Stage::Publishing))?;

        enter(&mut stages, Stage::Done);
        let status = if replacing {
            InstallStatus::Replaced
        } else {
            InstallStatus::Installed
        };
        Ok(self.report(entry, destination, status, fetched.attempts, stages))
    }

    /// Remove the installed binary from `dir` under the destination lock.
    ///
    /// Returns the removed path, or `None` when nothing was installed.
    pub async fn uninstall(&self, dir: &Path) -> Result<Option<PathBuf>, PourError> {
        uninstall_binary(self.destination(dir), self.cancel.clone()).await
    }

    fn report(
        &self,
        entry: ReleaseEntry,
        path: PathBuf,
        status: InstallStatus,
        fetch_attempts: u32,
        stages: Vec<Stage>,
    ) -> InstallReport {
        InstallReport {
            binary: InstalledBinary {
                path,
                version: entry.version,
            },
            status,
            platform: entry.platform,
            url: entry.url,
            sha256: entry.sha256,
            fetch_attempts,
            stages,
        }
    }
}

fn enter(stages: &mut Vec<Stage>, stage: Stage) {
    tracing::debug!(%stage, "entering stage");
    stages.push(stage);
}

/// Whether `path` carries the permissions `publish` gives it.
#[cfg(unix)]
fn has_install_mode(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|meta| meta.permissions().mode() & 0o777 == INSTALL_MODE)
}

#[cfg(not(unix))]
fn has_install_mode(_path: &Path) -> bool {
    true
}

async fn hash_file(path: PathBuf) -> Result<String, PourError> {
    let digest = tokio::task::spawn_blocking(move || {
        sha256_file(&path).map_err(|e| FsError::new("read", &path, e))
    })
    .await??;
    Ok(digest)
}

/// Atomically place `bytes` at `destination` as an executable.
///
/// Holds the destination lock for the whole write. On any failure, including
/// cancellation before the rename, the temporary file is removed and the
/// destination is left as it was.
fn publish(
    destination: &Path,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<(), PourError> {
    let name = destination.file_name().ok_or_else(|| {
        FsError::new(
            "publish",
            destination,
            io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"),
        )
    })?;
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    if cancel.is_cancelled() {
        return Err(PourError::Cancelled);
    }

    fs::create_dir_all(dir).map_err(|e| FsError::new("create directory", dir, e))?;
    let _lock = DestinationLock::acquire(destination, cancel)?;

    let mut staged = tempfile::Builder::new()
        .prefix(&format!(".{}.", name.to_string_lossy()))
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|e| FsError::new("create temporary file in", dir, e))?;
    staged
        .write_all(bytes)
        .map_err(|e| FsError::new("write", staged.path(), e))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|e| FsError::new("sync", staged.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(INSTALL_MODE))
            .map_err(|e| FsError::new("set permissions on", staged.path(), e))?;
    }

    // Last point where cancelling changes anything
    if cancel.is_cancelled() {
        tracing::info!("cancelled before publishing {}", destination.display());
        return Err(PourError::Cancelled);
    }

    staged
        .persist(destination)
        .map_err(|e| FsError::new("rename into place", destination, e.error))?;
    sync_dir(dir);
    tracing::info!("published {}", destination.display());
    Ok(())
}

/// Remove `destination` under its lock. `None` when there was nothing to remove.
async fn uninstall_binary(
    destination: PathBuf,
    cancel: CancellationToken,
) -> Result<Option<PathBuf>, PourError> {
    tokio::task::spawn_blocking(move || remove_binary(&destination, &cancel)).await?
}

fn remove_binary(
    destination: &Path,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>, PourError> {
    let Some(dir) = destination.parent() else {
        return Ok(None);
    };
    if !dir.is_dir() {
        return Ok(None);
    }

    let _lock = DestinationLock::acquire(destination, cancel)?;
    match fs::remove_file(destination) {
        Ok(()) => {
            sync_dir(dir);
            tracing::info!("removed {}", destination.display());
            Ok(Some(destination.to_path_buf()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FsError::new("remove", destination, e).into()),
    }
}

/// Flush the directory entry so the rename survives a crash.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = fs::File::open(dir)
            && let Err(e) = handle.sync_all()
        {
            tracing::debug!("failed to sync {}: {}", dir.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}
