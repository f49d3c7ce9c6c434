//! Runtime configuration for sitekit.
//!
//! This crate owns the on-disk configuration schema so the runtime and the
//! application shell share a single source of truth.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime tunables loaded from `sitekit.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    /// Event-bus history capacity (ring buffer size).
    pub history_capacity: usize,
    /// Ceiling on failed load attempts per module.
    pub max_retries: u32,
    /// Seconds between full state snapshots.
    pub snapshot_interval_secs: u64,
    /// Prefix applied to every persistent-storage key.
    pub storage_prefix: String,
    /// Language used when nothing is stored and no translation exists.
    pub default_language: String,
    /// Languages the site ships translations for.
    pub supported_languages: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            max_retries: 3,
            snapshot_interval_secs: 30,
            storage_prefix: "sitekit.".to_string(),
            default_language: "fr".to_string(),
            supported_languages: vec!["fr".to_string(), "en".to_string(), "ru".to_string()],
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate configuration TOML.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse runtime config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config at {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display()))
    }

    /// Load from disk if the file exists, otherwise fall back to defaults.
    /// A present-but-invalid file is an error, not a silent fallback.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate semantic constraints.
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            bail!("history_capacity must be at least 1");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        if self.snapshot_interval_secs == 0 {
            bail!("snapshot_interval_secs must be at least 1");
        }
        if self.storage_prefix.is_empty() {
            bail!("storage_prefix must not be empty");
        }
        if self.supported_languages.is_empty() {
            bail!("supported_languages must not be empty");
        }
        if !self.supported_languages.contains(&self.default_language) {
            bail!(
                "default_language `{}` is not in supported_languages",
                self.default_language
            );
        }
        Ok(())
    }
}
