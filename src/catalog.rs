//! Release catalog: maps (version, platform) to a download URL and checksum.
//!
//! The catalog is static data supplied from outside the installer, usually a
//! TOML file. Lookups are exact: the caller names a version and gets the entry
//! for that version on its platform, or a [`ResolveError`] that says whether the
//! version is unknown or simply not built for this platform. The only
//! indirection is the pair of `latest` pointers the catalog itself declares.
//!
//! # File Format
//!
//! ```toml
//! binary = "nihongo"
//! latest = "1.4.0"
//! url_template = "https://github.com/rapoyrazoglu/nihongo/releases/download/v{version}/nihongo-{os}"
//!
//! [[release]]
//! version = "1.4.0"
//! os = "linux"
//! sha256 = "df5d67d1924e4291ff3857801b30a5e582270ebc6725cde6da1ba2300a63be31"
//! ```
//!
//! An entry without `arch` covers every supported architecture. An entry
//! without `url` takes its URL from `url_template`, which may reference
//! `{version}`, `{os}`, `{arch}` and `{binary}`.
//!
//! Every (version, platform) pair must be unique. A second entry for the same
//! pair is a load error, never a silent overwrite.

use crate::checksum::{InvalidDigest, Sha256Digest};
use crate::platform::{Arch, Os, ParsePlatformError, Platform};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BUILTIN_CATALOG: &str = include_str!("../catalog/nihongo.toml");

/// One published binary: a version built for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseEntry {
    pub version: String,
    pub platform: Platform,
    pub url: String,
    pub sha256: Sha256Digest,
}

/// Which `latest` pointer to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Prerelease,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Stable => f.write_str("stable"),
            Channel::Prerelease => f.write_str("pre-release"),
        }
    }
}

/// A lookup found nothing to install.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no version requested")]
    EmptyVersion,

    #[error("version {version} is not in the release catalog")]
    UnknownVersion { version: String },

    #[error(
        "version {version} has no build for {platform} (available: {})",
        join_platforms(.available)
    )]
    UnsupportedPlatform {
        version: String,
        platform: Platform,
        available: Vec<Platform>,
    },

    #[error("the release catalog does not name a latest {channel} version")]
    NoLatest { channel: Channel },
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The catalog data itself is unusable.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("catalog `binary` must be a plain file name, got `{0}`")]
    InvalidBinaryName(String),

    #[error("release entry has an empty version")]
    EmptyVersion,

    #[error("release {version}: {source}")]
    InvalidPlatform {
        version: String,
        #[source]
        source: ParsePlatformError,
    },

    #[error("release {version}: {source}")]
    InvalidDigest {
        version: String,
        #[source]
        source: InvalidDigest,
    },

    #[error("release {version} for {platform} has no url and the catalog has no url_template")]
    MissingUrl { version: String, platform: Platform },

    #[error("duplicate catalog entry for {version} on {platform}")]
    DuplicateEntry { version: String, platform: Platform },

    #[error("latest {channel} version {version} has no release entries")]
    DanglingLatest { channel: Channel, version: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    binary: String,
    #[serde(default)]
    latest: Option<String>,
    #[serde(default)]
    latest_prerelease: Option<String>,
    #[serde(default)]
    url_template: Option<String>,
    #[serde(default, rename = "release")]
    releases: Vec<RawRelease>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelease {
    version: String,
    os: String,
    #[serde(default)]
    arch: Option<String>,
    #[serde(default)]
    url: Option<String>,
    sha256: String,
}

/// Release catalog keyed uniquely by (version, platform).
#[derive(Debug, Clone)]
pub struct VersionCatalog {
    binary: String,
    latest: Option<String>,
    latest_prerelease: Option<String>,
    entries: BTreeMap<(String, Platform), ReleaseEntry>,
}

impl VersionCatalog {
    /// Create an empty catalog for the binary installed as `binary`.
    pub fn new(binary: impl Into<String>) -> Result<Self, CatalogError> {
        let binary = binary.into();
        if binary.is_empty() || binary == "." || binary == ".." || binary.contains(['/', '\\']) {
            return Err(CatalogError::InvalidBinaryName(binary));
        }
        Ok(Self {
            binary,
            latest: None,
            latest_prerelease: None,
            entries: BTreeMap::new(),
        })
    }

    /// The catalog shipped with pour.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate catalog TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        let mut catalog = Self::new(file.binary)?;

        for raw in file.releases {
            let version = normalize_version(&raw.version)
                .ok_or(CatalogError::EmptyVersion)?
                .to_string();
            let os: Os = raw
                .os
                .parse()
                .map_err(|source| CatalogError::InvalidPlatform {
                    version: version.clone(),
                    source,
                })?;
            let arches = match &raw.arch {
                Some(arch) => vec![arch.parse::<Arch>().map_err(|source| {
                    CatalogError::InvalidPlatform {
                        version: version.clone(),
                        source,
                    }
                })?],
                None => Arch::ALL.to_vec(),
            };
            let sha256 =
                Sha256Digest::parse(&raw.sha256).map_err(|source| CatalogError::InvalidDigest {
                    version: version.clone(),
                    source,
                })?;

            for arch in arches {
                let platform = Platform::new(os, arch);
                let url = match (raw.url.as_deref(), file.url_template.as_deref()) {
                    (Some(url), _) if !url.is_empty() => url.to_string(),
                    (_, Some(template)) if !template.is_empty() => {
                        expand_template(template, &version, platform, &catalog.binary)
                    }
                    _ => {
                        return Err(CatalogError::MissingUrl { version, platform });
                    }
                };
                catalog.insert(ReleaseEntry {
                    version: version.clone(),
                    platform,
                    url,
                    sha256: sha256.clone(),
                })?;
            }
        }

        if let Some(version) = file.latest {
            catalog.set_latest(Channel::Stable, &version)?;
        }
        if let Some(version) = file.latest_prerelease {
            catalog.set_latest(Channel::Prerelease, &version)?;
        }

        Ok(catalog)
    }

    /// Add an entry. A second entry for the same (version, platform) is rejected.
    pub fn insert(&mut self, mut entry: ReleaseEntry) -> Result<(), CatalogError> {
        entry.version = normalize_version(&entry.version)
            .ok_or(CatalogError::EmptyVersion)?
            .to_string();
        let key = (entry.version.clone(), entry.platform);
        if self.entries.contains_key(&key) {
            return Err(CatalogError::DuplicateEntry {
                version: entry.version,
                platform: entry.platform,
            });
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Point a channel at a version that has entries.
    pub fn set_latest(&mut self, channel: Channel, version: &str) -> Result<(), CatalogError> {
        let version = normalize_version(version).ok_or(CatalogError::EmptyVersion)?;
        if self.platforms_for(version).is_empty() {
            return Err(CatalogError::DanglingLatest {
                channel,
                version: version.to_string(),
            });
        }
        let slot = match channel {
            Channel::Stable => &mut self.latest,
            Channel::Prerelease => &mut self.latest_prerelease,
        };
        *slot = Some(version.to_string());
        Ok(())
    }

    /// File name the binary is installed under.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn latest(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Stable => self.latest.as_deref(),
            Channel::Prerelease => self.latest_prerelease.as_deref(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact lookup of `version` on `platform`.
    ///
    /// A leading `v` on the request is ignored (`v1.4.0` finds `1.4.0`).
    ///
    /// # Examples
    ///
    /// ```
    /// use pour::catalog::VersionCatalog;
    /// use pour::platform::Platform;
    ///
    /// let catalog = VersionCatalog::builtin().unwrap();
    /// let entry = catalog.resolve("1.4.0", "linux-x86_64".parse().unwrap()).unwrap();
    /// assert!(entry.url.ends_with("/v1.4.0/nihongo-linux"));
    /// ```
    pub fn resolve(&self, version: &str, platform: Platform) -> Result<&ReleaseEntry, ResolveError> {
        let wanted = normalize_version(version).ok_or(ResolveError::EmptyVersion)?;
        if let Some(entry) = self.entries.get(&(wanted.to_string(), platform)) {
            return Ok(entry);
        }

        let available = self.platforms_for(wanted);
        if available.is_empty() {
            Err(ResolveError::UnknownVersion {
                version: wanted.to_string(),
            })
        } else {
            Err(ResolveError::UnsupportedPlatform {
                version: wanted.to_string(),
                platform,
                available,
            })
        }
    }

    /// Resolve the version a channel's `latest` pointer names.
    pub fn resolve_channel(
        &self,
        channel: Channel,
        platform: Platform,
    ) -> Result<&ReleaseEntry, ResolveError> {
        let version = self.latest(channel).ok_or(ResolveError::NoLatest { channel })?;
        self.resolve(version, platform)
    }

    /// Platforms `version` is published for.
    pub fn platforms_for(&self, version: &str) -> Vec<Platform> {
        self.entries
            .values()
            .filter(|entry| entry.version == version)
            .map(|entry| entry.platform)
            .collect()
    }

    /// Versions published for `platform`, newest first.
    pub fn versions_for(&self, platform: Platform) -> Vec<&str> {
        let mut versions: Vec<&str> = self
            .entries
            .values()
            .filter(|entry| entry.platform == platform)
            .map(|entry| entry.version.as_str())
            .collect();
        versions.sort_by(|a, b| compare_versions(b, a));
        versions.dedup();
        versions
    }
}

/// Trim and drop a leading `v` that precedes a digit. `None` when empty.
pub fn normalize_version(version: &str) -> Option<&str> {
    let version = version.trim();
    let version = match version.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => version,
    };
    (!version.is_empty()).then_some(version)
}

/// Order dotted versions numerically; a pre-release sorts before its release.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_core, a_pre) = split_prerelease(a);
    let (b_core, b_pre) = split_prerelease(b);

    let a_parts: Vec<u64> = a_core.split('.').map(|p| p.parse().unwrap_or(0)).collect();
    let b_parts: Vec<u64> = b_core.split('.').map(|p| p.parse().unwrap_or(0)).collect();
    let len = a_parts.len().max(b_parts.len());
    for i in 0..len {
        let x = a_parts.get(i).copied().unwrap_or(0);
        let y = b_parts.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    match (a_pre, b_pre) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(y),
    }
}

fn split_prerelease(version: &str) -> (&str, Option<&str>) {
    match version.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (version, None),
    }
}

fn expand_template(template: &str, version: &str, platform: Platform, binary: &str) -> String {
    template
        .replace("{version}", version)
        .replace("{os}", platform.os.as_str())
        .replace("{arch}", platform.arch.as_str())
        .replace("{binary}", binary)
}
