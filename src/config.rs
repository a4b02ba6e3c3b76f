//! Engine configuration loaded from TOML.
//!
//! ```toml
//! [search]
//! use_indexes = true
//! range_lookups = true
//! narrow_candidates = true
//! max_index_matches = 1000000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Knobs for the index-aware search pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Consult indexes at all. When off, every comparison is evaluated per record.
    pub use_indexes: bool,
    /// Answer `<`, `<=`, `>`, `>=` through index range scans.
    pub range_lookups: bool,
    /// Treat an index answer as exhaustive for records of the target class, so
    /// records outside it are rejected without evaluation.
    pub narrow_candidates: bool,
    /// Index answers larger than this are discarded in favour of evaluation.
    pub max_index_matches: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            use_indexes: true,
            range_lookups: true,
            narrow_candidates: true,
            max_index_matches: 1_000_000,
        }
    }
}

/// Top-level configuration document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Search pass options.
    pub search: SearchOptions,
}

impl EngineOptions {
    /// Parses options from TOML text; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: EngineOptions =
            toml::from_str(text).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options: EngineOptions =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Serializes the options back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|source| ConfigError::Serialize { source })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.search.max_index_matches == 0 {
            return Err(ConfigError::Invalid {
                key: "search.max_index_matches",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The TOML was malformed or had wrongly typed values.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that failed, or `<inline>`.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Serializing options failed.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Underlying TOML error.
        source: toml::ser::Error,
    },
    /// A value parsed but is out of range.
    #[error("config key {key} {reason}")]
    Invalid {
        /// Dotted key path.
        key: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
