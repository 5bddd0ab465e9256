//! Runtime configuration.
//!
//! Every section has defaults, so an empty JSON object is a valid
//! configuration:
//!
//! ```
//! use meterstat::MeterConfig;
//!
//! let config = MeterConfig::from_json_str(r#"{ "runtime": { "workers": 8 } }"#).unwrap();
//! assert_eq!(config.runtime.workers, 8);
//! assert_eq!(config.runtime.queue_capacity, 1024);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MeterError, ValidationError};
use crate::period::Period;

fn invalid(reason: impl Into<String>) -> MeterError {
    ValidationError::InvalidConfig {
        reason: reason.into(),
    }
    .into()
}

/// Dogpile cache settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prune idle per-key locks once the lock table grows past this size.
    /// `None` keeps every lock for the life of the process.
    pub prune_locks_above: Option<usize>,
}

/// Resolution engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Turn a panicking resolver into a failed outcome instead of unwinding
    /// through the engine.
    pub catch_panics: bool,
    /// Period of the population statistics handed to resolvers.
    pub statistics_period: Period,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catch_panics: true,
            statistics_period: Period::months(1),
        }
    }
}

/// Batch resolution worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Log-backed store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub cache: CacheConfig,
    pub engine: EngineConfig,
    pub runtime: RuntimeConfig,
    pub persistent: PersistentConfig,
}

impl MeterConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` on malformed JSON or invalid
    /// values.
    pub fn from_json_str(input: &str) -> Result<Self, MeterError> {
        let config: Self = serde_json::from_str(input).map_err(|e| invalid(e.to_string()))?;
        config.validate()
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the file cannot be read or
    /// does not hold a valid configuration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MeterError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&input)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` naming the offending setting.
    pub fn validate(self) -> Result<Self, MeterError> {
        if self.runtime.workers == 0 {
            return Err(invalid("runtime.workers must be at least 1"));
        }
        if self.runtime.queue_capacity == 0 {
            return Err(invalid("runtime.queue_capacity must be at least 1"));
        }
        if self.cache.prune_locks_above == Some(0) {
            return Err(invalid("cache.prune_locks_above must be at least 1"));
        }
        if self.engine.statistics_period.is_zero() {
            return Err(invalid("engine.statistics_period must not be zero"));
        }
        Ok(self)
    }
}
