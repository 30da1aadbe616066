//! Runtime configuration
//!
//! `RuntimeOptions` follows the usual layering: compiled-in defaults, then
//! an optional TOML file, then `GARNET_*` environment overrides.

use crate::defaults::*;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Errors produced while loading runtime options
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    /// The options file could not be read
    #[error("failed to read options file {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The options file is not valid TOML for `RuntimeOptions`
    #[error("invalid options: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override holds an unparsable value
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// A value parsed but is out of range
    #[error("{0}")]
    OutOfRange(String),
}

/// Configuration for a `Runtime`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Slice length for interruptible blocking waits, in milliseconds
    pub blocking_poll_interval_ms: u64,

    /// Maximum number of activations rendered before an omission marker
    pub backtraces_limit: Option<usize>,

    /// Replace core library frames by the next user frame location
    pub backtraces_hide_core_files: bool,

    /// Interleave the native host trace into rendered backtraces
    pub backtraces_interleave_native: bool,

    /// Render backtraces captured for unused rescues as a single marker line
    pub backtraces_omit_unused: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            blocking_poll_interval_ms: DEFAULT_BLOCKING_POLL_INTERVAL_MS,
            backtraces_limit: None,
            backtraces_hide_core_files: DEFAULT_BACKTRACES_HIDE_CORE_FILES,
            backtraces_interleave_native: DEFAULT_BACKTRACES_INTERLEAVE_NATIVE,
            backtraces_omit_unused: DEFAULT_BACKTRACES_OMIT_UNUSED,
        }
    }
}

impl RuntimeOptions {
    /// Parse options from a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, OptionsError> {
        let options: RuntimeOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply `GARNET_*` environment overrides on top of these options
    pub fn with_env_overrides(self) -> Result<Self, OptionsError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production,
    /// a map in tests)
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, OptionsError> {
        if let Some(value) = lookup("GARNET_BLOCKING_POLL_INTERVAL_MS") {
            self.blocking_poll_interval_ms =
                parse_env("GARNET_BLOCKING_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("GARNET_BACKTRACES_LIMIT") {
            self.backtraces_limit = Some(parse_env("GARNET_BACKTRACES_LIMIT", &value)?);
        }
        if let Some(value) = lookup("GARNET_BACKTRACES_HIDE_CORE_FILES") {
            self.backtraces_hide_core_files =
                parse_env("GARNET_BACKTRACES_HIDE_CORE_FILES", &value)?;
        }
        if let Some(value) = lookup("GARNET_BACKTRACES_INTERLEAVE_NATIVE") {
            self.backtraces_interleave_native =
                parse_env("GARNET_BACKTRACES_INTERLEAVE_NATIVE", &value)?;
        }
        if let Some(value) = lookup("GARNET_BACKTRACES_OMIT_UNUSED") {
            self.backtraces_omit_unused = parse_env("GARNET_BACKTRACES_OMIT_UNUSED", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Slice length for interruptible blocking waits
    pub fn blocking_poll_interval(&self) -> Duration {
        Duration::from_millis(self.blocking_poll_interval_ms)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.blocking_poll_interval_ms == 0 {
            return Err(OptionsError::OutOfRange(
                "blocking_poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, OptionsError> {
    value.trim().parse().map_err(|_| OptionsError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}
