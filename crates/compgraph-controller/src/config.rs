//! Controller configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use compgraph_core::{duration, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Work queue parameters.
    pub controller: QueueConfig,
    /// Graph resolution limits.
    pub resolver: ResolverConfig,
    /// Local descriptor repository.
    pub repository: RepositoryConfig,
    /// Trust material for signature verification.
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Max component versions reconciled at the same time.
    pub workers: usize,
    /// Retry delay when an intent cannot be read from the store.
    #[serde(with = "duration")]
    pub default_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Deepest reference chain walked below the root.
    pub max_depth: usize,
    /// Re-read-and-retry attempts on a write conflict.
    pub conflict_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Directory laid out as `<component>/<version>/component-descriptor.yaml`.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Directory holding `<secret-name>.pub` files (base64 Ed25519 keys).
    pub keys_dir: PathBuf,
}

// ============================================================
// Defaults
// ============================================================

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            default_interval: Duration::from_secs(600),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            conflict_retries: 5,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("components"),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            keys_dir: PathBuf::from("keys"),
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl ControllerConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Reject values that would only fail later, mid-walk.
    pub fn validate(&self) -> Result<()> {
        if self.controller.workers == 0 {
            return Err(Error::Config("controller.workers must be at least 1".into()));
        }
        if self.controller.default_interval.is_zero() {
            return Err(Error::Config("controller.default_interval must be positive".into()));
        }
        if self.resolver.max_depth == 0 {
            return Err(Error::Config("resolver.max_depth must be at least 1".into()));
        }
        if self.resolver.conflict_retries == 0 {
            return Err(Error::Config("resolver.conflict_retries must be at least 1".into()));
        }
        Ok(())
    }
}
