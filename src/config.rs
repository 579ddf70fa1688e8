//! Configuration file support.
//!
//! ```toml
//! [copy]
//! policy = "wait-all"      # or "cancel-siblings"
//! buffer_size = 32768
//!
//! [trace]
//! target = "stderr"        # "discard" | "stderr" | "tracing"
//! prefix = "+ "
//! ```
//!
//! Unset fields keep their defaults. Environment variables
//! (`CMDIO_TRACE`, `CMDIO_COPY_POLICY`) override the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::copy::{CopyOptions, CopyPolicy};
use crate::trace::{self, TraceTarget};

/// Environment variable selecting the trace target.
pub const TRACE_ENV: &str = "CMDIO_TRACE";

/// Environment variable selecting the pipeline copy policy.
pub const COPY_POLICY_ENV: &str = "CMDIO_COPY_POLICY";

const DEFAULT_PREFIX: &str = "+ ";

/// Library configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pipeline settings
    pub copy: CopyConfig,

    /// Command trace settings
    pub trace: TraceConfig,
}

/// Pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    pub policy: Option<CopyPolicy>,

    /// Chunk size for edges that copy in a loop
    pub buffer_size: Option<usize>,
}

/// Command trace settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub target: Option<TraceTarget>,

    /// Line prefix for the stderr target
    pub prefix: Option<String>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
            Self::default()
        })
    }

    /// Load and merge configuration files; later files take precedence.
    pub fn load_layered<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut config = Self::default();
        for path in paths {
            config.merge(Self::load_or_default(path.as_ref()));
        }
        config
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config: {}", path.display()))
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.copy.policy.is_some() {
            self.copy.policy = other.copy.policy;
        }
        if other.copy.buffer_size.is_some() {
            self.copy.buffer_size = other.copy.buffer_size;
        }
        if other.trace.target.is_some() {
            self.trace.target = other.trace.target;
        }
        if other.trace.prefix.is_some() {
            self.trace.prefix = other.trace.prefix;
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which returns the value of a variable.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(TRACE_ENV) {
            let target = value
                .parse::<TraceTarget>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {}", TRACE_ENV))?;
            self.trace.target = Some(target);
        }
        if let Some(value) = lookup(COPY_POLICY_ENV) {
            let policy = value
                .parse::<CopyPolicy>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {}", COPY_POLICY_ENV))?;
            self.copy.policy = Some(policy);
        }
        Ok(())
    }

    /// Pipeline options with defaults filled in.
    pub fn copy_options(&self) -> CopyOptions {
        let defaults = CopyOptions::default();
        CopyOptions {
            policy: self.copy.policy.unwrap_or(defaults.policy),
            buffer_size: self.copy.buffer_size.unwrap_or(defaults.buffer_size),
        }
    }

    pub fn trace_target(&self) -> TraceTarget {
        self.trace.target.unwrap_or_default()
    }

    pub fn trace_prefix(&self) -> &str {
        self.trace.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }

    /// Install the configured trace destination process-wide.
    pub fn install(&self) {
        tracing::debug!(destination = ?self.trace_target(), "installing command trace");
        trace::install(self.trace_target(), self.trace_prefix());
    }
}
