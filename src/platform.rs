//! Platform detection for selecting the correct prebuilt binary.
//!
//! Releases publish one binary per operating system and CPU architecture.
//! A [`Platform`] names one of those variants:
//! - **Operating systems**: macOS, Linux
//! - **CPU architectures**: x86_64 (Intel/AMD), aarch64 (Apple Silicon, ARM64 servers)
//!
//! The set of variants is closed. Publishing a binary for another architecture
//! means adding a catalog entry for a variant listed here, not new dispatch code.
//!
//! # Platform Format
//!
//! Platforms render as `<os>-<arch>`:
//! - Examples: `macos-aarch64`, `linux-x86_64`
//!
//! Parsing also accepts the names other tools use (`darwin`, `amd64`, `arm64`).
//!
//! # Examples
//!
//! ```no_run
//! use pour::platform::Platform;
//!
//! fn main() -> anyhow::Result<()> {
//!     let platform = Platform::current()?;
//!     println!("This system needs: {}", platform);
//!     // Output: "macos-aarch64" on an M3 Mac
//!     // Output: "linux-x86_64" on an Intel Linux box
//!
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Operating systems that releases are published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Macos,
    Linux,
}

impl Os {
    pub const ALL: [Os; 2] = [Os::Macos, Os::Linux];

    pub fn as_str(self) -> &'static str {
        match self {
            Os::Macos => "macos",
            Os::Linux => "linux",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Os {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "macos" | "darwin" | "osx" => Ok(Os::Macos),
            "linux" => Ok(Os::Linux),
            _ => Err(ParsePlatformError(s.to_string())),
        }
    }
}

/// CPU architectures that releases are published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::X86_64, Arch::Aarch64];

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Homebrew and Go say "arm64"/"amd64"; Rust says "aarch64"/"x86_64"
        match s.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            _ => Err(ParsePlatformError(s.to_string())),
        }
    }
}

/// One binary variant: an operating system paired with a CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detect the platform of the running host.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedHost`] when the host is not macOS or Linux, or runs
    /// on an architecture no release is built for.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pour::platform::Platform;
    ///
    /// let platform = Platform::current().unwrap();
    /// println!("{}", platform); // "linux-x86_64"
    /// ```
    pub fn current() -> Result<Self, UnsupportedHost> {
        Self::from_target(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map Rust target names (`std::env::consts`) onto a supported platform.
    pub fn from_target(os: &str, arch: &str) -> Result<Self, UnsupportedHost> {
        let unsupported = || UnsupportedHost {
            os: os.to_string(),
            arch: arch.to_string(),
        };
        let os_kind = match os {
            "macos" => Os::Macos,
            "linux" => Os::Linux,
            _ => return Err(unsupported()),
        };
        let arch_kind = match arch {
            "x86_64" => Arch::X86_64,
            "aarch64" => Arch::Aarch64,
            _ => return Err(unsupported()),
        };
        Ok(Self::new(os_kind, arch_kind))
    }

    /// Every supported platform, in a stable order.
    pub fn all() -> impl Iterator<Item = Platform> {
        Os::ALL
            .into_iter()
            .flat_map(|os| Arch::ALL.into_iter().map(move |arch| Platform::new(os, arch)))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (os, arch) = s
            .split_once('-')
            .ok_or_else(|| ParsePlatformError(s.to_string()))?;
        let os = os.parse().map_err(|_| ParsePlatformError(s.to_string()))?;
        let arch = arch.parse().map_err(|_| ParsePlatformError(s.to_string()))?;
        Ok(Self::new(os, arch))
    }
}

/// The running host is not one that releases are published for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported host platform: {os}/{arch}")]
pub struct UnsupportedHost {
    pub os: String,
    pub arch: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid platform `{0}` (expected <os>-<arch>, e.g. linux-x86_64)")]
pub struct ParsePlatformError(pub String);
