//! Library interface for pour, the verified prebuilt-binary installer
//!
//! The `pour` binary is a thin command-line layer over these modules; they are
//! exposed for integration tests and for embedding the installer elsewhere.

pub mod catalog;
pub mod checksum;
pub mod config;
pub mod download;
pub mod error;
pub mod installer;
pub mod lock;
pub mod output;
pub mod platform;
pub mod retry;
pub mod selfcheck;

// Re-export commonly used types
pub use catalog::{Channel, ReleaseEntry, ResolveError, VersionCatalog};
pub use checksum::{ChecksumMismatch, Sha256Digest};
pub use download::{ArtifactFetcher, FetchResult, HttpTransport, NetworkError, RetryingFetcher};
pub use error::{PourError, Result};
pub use installer::{
    InstallError, InstallReport, InstallRequest, InstallStatus, Installer, Stage, VersionRequest,
};
pub use platform::Platform;
pub use retry::RetryPolicy;
