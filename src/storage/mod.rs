//! Storage traits and backends for meterstat.
//!
//! The traits define the contract for storage backends; `memory` provides
//! thread-safe in-memory implementations and `persistent` (behind the
//! `persistent` feature) a log-backed computed-value store.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{InMemoryComputedValueStore, InMemoryDataService, InMemoryMessageStore};
pub use traits::{ComputedValueStore, MessageStore, StorageError};
