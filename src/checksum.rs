//! SHA-256 checksum verification for downloaded artifacts.
//!
//! The digest always covers the exact bytes that were fetched. There is no
//! normalisation and no prefix check. A mismatch is fatal to an install and is
//! never retried.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

const BUF_SIZE: usize = 64 * 1024;

/// A validated hex-encoded SHA-256 digest, stored lowercase.
///
/// # Examples
///
/// ```
/// use pour::checksum::Sha256Digest;
///
/// let digest: Sha256Digest = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
///     .parse()
///     .unwrap();
/// assert!(digest.as_str().starts_with("e3b0c442"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Digest(String);

impl Sha256Digest {
    pub fn parse(value: &str) -> Result<Self, InvalidDigest> {
        if value.len() != DIGEST_HEX_LEN {
            return Err(InvalidDigest {
                value: value.to_string(),
                reason: format!(
                    "expected {DIGEST_HEX_LEN} hex characters, got {}",
                    value.len()
                ),
            });
        }
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(InvalidDigest {
                value: value.to_string(),
                reason: format!("non-hex character `{bad}`"),
            });
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a hex string.
    pub fn matches(&self, hex: &str) -> bool {
        self.0.eq_ignore_ascii_case(hex)
    }
}

impl FromStr for Sha256Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Sha256Digest> for String {
    fn from(digest: Sha256Digest) -> Self {
        digest.0
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid sha256 digest `{value}`: {reason}")]
pub struct InvalidDigest {
    pub value: String,
    pub reason: String,
}

/// The fetched bytes do not hash to the published digest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("checksum mismatch: expected {expected}, got {actual}")]
pub struct ChecksumMismatch {
    pub expected: String,
    pub actual: String,
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Verify `bytes` against `expected` (hex, any case).
///
/// # Examples
///
/// ```
/// use pour::checksum::verify;
///
/// let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
/// assert!(verify(b"abc", expected).is_ok());
/// assert!(verify(b"abd", expected).is_err());
/// ```
pub fn verify(bytes: &[u8], expected: &str) -> Result<(), ChecksumMismatch> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Hex-encoded SHA-256 of a file, read in chunks.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; BUF_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
