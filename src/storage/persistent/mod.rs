//! Persistent storage backend for meterstat.
//!
//! Provides a durable computed-value store with:
//! - An append-only log replayed on open
//! - CRC32 checksums for corruption detection
//! - Compaction to one record per key
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │          LogComputedValueStore             │
//! ├────────────────────────────────────────────┤
//! │  index: HashMap<ComputationKey, Value>     │
//! │           ↑ replay        ↓ append         │
//! │  ┌──────────────────────────────────────┐  │
//! │  │ values.log (framed JSON records)     │  │
//! │  └──────────────────────────────────────┘  │
//! └────────────────────────────────────────────┘
//! ```

mod codec;
mod log;

pub use log::LogComputedValueStore;

use std::path::Path;

pub use crate::config::PersistentConfig;
use crate::error::{ExecutionError, MeterError};

/// Open or create a computed-value log at the given path.
///
/// # Errors
/// - If the file cannot be created or accessed
/// - If the file exists but is not a computed-value log
///
/// # Example
/// ```rust,ignore
/// use meterstat::storage::persistent::open_value_store;
///
/// let store = open_value_store("./values.log", None)?;
/// let cache = DogpileCache::new(Arc::new(store), aggregator);
/// ```
pub fn open_value_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<LogComputedValueStore, MeterError> {
    let cfg = config.unwrap_or_default();
    LogComputedValueStore::open(path.as_ref(), &cfg).map_err(|e| {
        MeterError::Execution(ExecutionError::Storage {
            message: format!("failed to open {}: {e}", path.as_ref().display()),
        })
    })
}
