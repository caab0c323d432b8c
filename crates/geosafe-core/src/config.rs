//! Runtime settings.
//!
//! Every key is optional; a missing file or an empty document yields the
//! defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bound on each broker submit / poll / await call.
    pub broker_timeout_ms: u64,

    /// Bound on impact function service calls.
    pub catalog_timeout_ms: u64,

    /// Root directory of the filesystem report store.
    pub artifact_root: PathBuf,

    /// Where temporary bundle archives are built (system temp dir if unset).
    pub scratch_dir: Option<PathBuf>,

    /// Owner recorded for submissions without a user.
    pub anonymous_owner: String,

    pub default_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker_timeout_ms: 30_000,
            catalog_timeout_ms: 60_000,
            artifact_root: PathBuf::from("analysis/report"),
            scratch_dir: None,
            anonymous_owner: "AnonymousUser".to_string(),
            default_language: "en".to_string(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "settings file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "broker_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.catalog_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "catalog_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.anonymous_owner.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "anonymous_owner",
                reason: "must not be blank".to_string(),
            });
        }
        Ok(())
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_timeout_ms)
    }

    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_millis(self.catalog_timeout_ms)
    }
}
