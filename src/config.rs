//! User settings: `config.toml` plus environment overrides.
//!
//! Every field is optional. Precedence, lowest to highest: built-in defaults,
//! the settings file, environment variables, command-line flags (applied by
//! the caller).
//!
//! | Variable           | Effect                                   |
//! |--------------------|------------------------------------------|
//! | `POUR_CONFIG`      | settings file to read                    |
//! | `POUR_CATALOG`     | release catalog file                     |
//! | `POUR_INSTALL_DIR` | destination directory                    |
//! | `POUR_PREFIX`      | destination is `$POUR_PREFIX/bin`        |

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read settings {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Retry section of the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Maximum attempts per download (including the first).
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter fraction between 0.0 and 1.0.
    pub jitter: f64,
    /// Total time budget for one download, in seconds.
    pub budget_secs: u64,
    /// Timeout for a single attempt, in seconds.
    pub attempt_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter: policy.jitter,
            budget_secs: policy.budget.as_secs(),
            attempt_timeout_secs: policy.attempt_timeout.as_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
            budget: Duration::from_secs(self.budget_secs),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        if self.budget_secs == 0 || self.attempt_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "retry.budget_secs and retry.attempt_timeout_secs must be positive".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Settings loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Release catalog file. The built-in catalog is used when unset.
    pub catalog: Option<PathBuf>,
    /// Directory the binary is installed into.
    pub install_dir: Option<PathBuf>,
    pub retry: RetrySettings,
}

impl Settings {
    /// Load settings from the default location and apply environment overrides.
    ///
    /// A missing settings file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        let mut settings = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::debug!("no settings file at {}, using defaults", path.display());
            Self::default()
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.retry.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.retry.validate()?;
        Ok(settings)
    }

    /// Apply `POUR_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(catalog) = non_empty("POUR_CATALOG") {
            self.catalog = Some(PathBuf::from(catalog));
        }
        if let Some(dir) = non_empty("POUR_INSTALL_DIR") {
            self.install_dir = Some(PathBuf::from(dir));
        } else if let Some(prefix) = non_empty("POUR_PREFIX") {
            self.install_dir = Some(PathBuf::from(prefix).join("bin"));
        }
    }

    /// Destination directory: configured, or `<prefix>/bin`.
    pub fn install_dir(&self) -> PathBuf {
        self.install_dir
            .clone()
            .unwrap_or_else(|| default_prefix().join("bin"))
    }
}

/// Settings file location (`POUR_CONFIG`, else XDG config dir).
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("POUR_CONFIG").filter(|p| !p.is_empty()) {
        PathBuf::from(path)
    } else if let Some(config_home) = std::env::var_os("XDG_CONFIG_HOME").filter(|p| !p.is_empty()) {
        PathBuf::from(config_home).join("pour/config.toml")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config/pour/config.toml")
    } else {
        PathBuf::from(".config/pour/config.toml")
    }
}

/// Default install prefix, mirroring where Homebrew puts binaries.
pub fn default_prefix() -> PathBuf {
    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        PathBuf::from("/opt/homebrew")
    } else {
        PathBuf::from("/usr/local")
    }
}
