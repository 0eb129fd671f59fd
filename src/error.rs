use crate::catalog::{CatalogError, ResolveError};
use crate::checksum::ChecksumMismatch;
use crate::config::ConfigError;
use crate::download::NetworkError;
use crate::platform::UnsupportedHost;
use crate::selfcheck::SelfCheckError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Process exit codes, one per failure family.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const RESOLUTION: i32 = 2;
    pub const NETWORK: i32 = 3;
    pub const CHECKSUM: i32 = 4;
    pub const FILESYSTEM: i32 = 5;
    pub const CANCELLED: i32 = 130;
}

#[derive(Error, Debug)]
pub enum PourError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    UnsupportedHost(#[from] UnsupportedHost),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Checksum(#[from] ChecksumMismatch),

    #[error(transparent)]
    Filesystem(#[from] FsError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    SelfCheck(#[from] SelfCheckError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("operation cancelled")]
    Cancelled,
}

impl PourError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PourError::Resolve(_) | PourError::UnsupportedHost(_) => exit_code::RESOLUTION,
            PourError::Network(_) => exit_code::NETWORK,
            PourError::Checksum(_) => exit_code::CHECKSUM,
            PourError::Filesystem(_) => exit_code::FILESYSTEM,
            PourError::Cancelled => exit_code::CANCELLED,
            PourError::Catalog(_)
            | PourError::Config(_)
            | PourError::SelfCheck(_)
            | PourError::Client(_)
            | PourError::Task(_) => exit_code::GENERAL,
        }
    }

    /// What the user should do about it.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            PourError::Resolve(ResolveError::NoLatest { .. }) => {
                Some("name an explicit version; run `pour list` to see published versions")
            }
            PourError::Resolve(_) => {
                Some("run `pour list` to see the versions published for this platform")
            }
            PourError::UnsupportedHost(_) => {
                Some("no prebuilt binary exists for this machine; pass --platform to fetch another variant")
            }
            PourError::Network(
                NetworkError::Exhausted { .. } | NetworkError::Transient { .. },
            ) => Some("check your network connection and re-run later"),
            PourError::Network(_) => {
                Some("the release URL is not reachable; the catalog entry may be wrong")
            }
            PourError::Checksum(_) => Some(
                "the download does not match its published checksum; do not use it and report a corrupted release",
            ),
            PourError::Filesystem(err) if err.is_permission_denied() => Some(
                "no write permission for the destination; pick another --dest or re-run with sufficient privileges",
            ),
            PourError::Filesystem(_) => Some("check free disk space and the destination path"),
            PourError::Catalog(_) => Some("fix the catalog and validate it with `pour check-catalog`"),
            _ => None,
        }
    }
}

/// A filesystem operation failed (permission, disk full, rename, lock).
#[derive(Error, Debug)]
#[error("failed to {op} {}: {source}", .path.display())]
pub struct FsError {
    pub op: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FsError {
    pub fn new(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.source.kind() == io::ErrorKind::PermissionDenied
    }
}

pub type Result<T> = std::result::Result<T, PourError>;
