//! Reading back what is installed.
//!
//! No bookkeeping is persisted next to the binary. The installed version comes
//! from the binary's own `--version` output, and the catalog digest for that
//! version tells whether the file on disk is still the published one.

use crate::catalog::{VersionCatalog, normalize_version};
use crate::checksum::sha256_file;
use crate::error::{FsError, PourError};
use crate::platform::Platform;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SelfCheckError {
    #[error("failed to run {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "{} --version did not finish within {}s",
        .path.display(),
        VERSION_TIMEOUT.as_secs()
    )]
    Timeout { path: PathBuf },

    #[error("{} --version exited with {status}", .path.display())]
    Failed { path: PathBuf, status: String },

    #[error("no version number in --version output: {0:?}")]
    Unparseable(String),
}

/// State of the binary at the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstalledStatus {
    NotInstalled { path: PathBuf },
    /// On-disk digest equals the catalog digest for the reported version.
    Intact { path: PathBuf, version: String },
    /// The binary reports a version, but its bytes are not the published ones.
    Modified {
        path: PathBuf,
        version: String,
        expected: String,
        actual: String,
    },
    /// The reported version has no catalog entry for this platform.
    Unknown {
        path: PathBuf,
        version: String,
        actual: String,
    },
}

/// Run `<path> --version` and extract the version it reports.
pub async fn reported_version(path: &Path) -> Result<String, SelfCheckError> {
    let child = Command::new(path)
        .arg("--version")
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(VERSION_TIMEOUT, child)
        .await
        .map_err(|_| SelfCheckError::Timeout {
            path: path.to_path_buf(),
        })?
        .map_err(|source| SelfCheckError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(SelfCheckError::Failed {
            path: path.to_path_buf(),
            status: output.status.to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_version_output(&stdout)
        .map(str::to_string)
        .ok_or_else(|| SelfCheckError::Unparseable(stdout.trim().to_string()))
}

/// First whitespace-separated token that looks like a version.
///
/// `nihongo 1.4.0` and `nihongo v1.4.0 (linux)` both give `1.4.0`.
pub fn parse_version_output(output: &str) -> Option<&str> {
    output
        .split_whitespace()
        .filter_map(normalize_version)
        .map(|token| token.trim_end_matches([',', ';', ')']))
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()))
}

/// Inspect the binary the catalog would install into `dir`.
pub async fn check_installed(
    catalog: &VersionCatalog,
    dir: &Path,
    platform: Platform,
) -> Result<InstalledStatus, PourError> {
    let path = dir.join(catalog.binary());
    if !path.exists() {
        return Ok(InstalledStatus::NotInstalled { path });
    }

    let version = reported_version(&path).await?;
    tracing::debug!("{} reports version {}", path.display(), version);

    let hash_path = path.clone();
    let actual = tokio::task::spawn_blocking(move || {
        sha256_file(&hash_path).map_err(|e| FsError::new("read", &hash_path, e))
    })
    .await??;

    Ok(match catalog.resolve(&version, platform) {
        Ok(entry) if entry.sha256.matches(&actual) => InstalledStatus::Intact { path, version },
        Ok(entry) => InstalledStatus::Modified {
            path,
            version,
            expected: entry.sha256.as_str().to_string(),
            actual,
        },
        Err(e) => {
            tracing::debug!("no catalog entry to compare against: {}", e);
            InstalledStatus::Unknown {
                path,
                version,
                actual,
            }
        }
    })
}
