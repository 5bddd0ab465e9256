//! Dogpile-protected computed-value cache.
//!
//! Many resolution workers ask for the same population statistic at roughly
//! the same time (every account of a utility at the start of the month). The
//! cache guarantees that, within one process, a key is computed at most once
//! no matter how many threads miss on it concurrently:
//!
//! ```text
//! get(key)
//!   ├─ memory hit ─────────────────────────────────────────→ value
//!   ├─ store hit ──────────────────────────────────────────→ value
//!   └─ lock(key)
//!        ├─ memory hit (another thread computed it) ──────→ value
//!        └─ compute → memory insert → unlock → store save → value
//! ```
//!
//! Store hits are not copied into memory: the store is the shared system of
//! record and may be updated by other processes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use dashmap::DashMap;

use crate::aggregation::AggregationService;
use crate::config::CacheConfig;
use crate::error::{ExecutionError, MeterResult};
use crate::key::ComputationKey;
use crate::storage::ComputedValueStore;
use crate::value::ComputedValue;

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from the in-process map without locking.
    pub memory_hits: u64,
    /// Served from the computed-value store.
    pub store_hits: u64,
    /// Aggregations run by this process.
    pub computations: u64,
    /// Aggregations that returned an error.
    pub failures: u64,
    /// Callers that waited on a key lock and found the value already computed.
    pub coalesced: u64,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

/// Single-flight cache in front of a [`ComputedValueStore`] and an
/// [`AggregationService`].
pub struct DogpileCache {
    values: DashMap<ComputationKey, ComputedValue>,
    locks: DashMap<ComputationKey, Arc<Mutex<()>>>,
    store: Arc<dyn ComputedValueStore>,
    aggregator: Arc<dyn AggregationService>,
    config: CacheConfig,
    counters: Counters,
}

impl DogpileCache {
    /// Creates a cache with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ComputedValueStore>, aggregator: Arc<dyn AggregationService>) -> Self {
        Self::with_config(store, aggregator, CacheConfig::default())
    }

    #[must_use]
    pub fn with_config(
        store: Arc<dyn ComputedValueStore>,
        aggregator: Arc<dyn AggregationService>,
        config: CacheConfig,
    ) -> Self {
        Self {
            values: DashMap::new(),
            locks: DashMap::new(),
            store,
            aggregator,
            config,
            counters: Counters::default(),
        }
    }

    /// Returns the value for `key`, computing it if neither memory nor the
    /// store has it.
    ///
    /// # Errors
    ///
    /// - `ExecutionError::Storage` if the store lookup fails
    /// - `ExecutionError::ComputationFailed` if the aggregation fails; nothing
    ///   is cached and the next call computes again
    pub fn get(&self, key: &ComputationKey) -> MeterResult<ComputedValue> {
        if let Some(value) = self.values.get(key) {
            Counters::bump(&self.counters.memory_hits);
            return Ok(value.clone());
        }

        if let Some(value) = self.store.find(key)? {
            Counters::bump(&self.counters.store_hits);
            return Ok(value);
        }

        let lock = self.lock_for(key);
        let computed = {
            // The guarded data is `()`, so a poisoned lock carries no broken state.
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(value) = self.values.get(key) {
                Counters::bump(&self.counters.coalesced);
                return Ok(value.clone());
            }

            let started = Instant::now();
            match self.aggregator.compute(key) {
                Ok(value) => {
                    Counters::bump(&self.counters.computations);
                    tracing::debug!(
                        key = %key,
                        empty = value.is_empty(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "computed statistic"
                    );
                    self.values.insert(*key, value.clone());
                    value
                }
                Err(source) => {
                    Counters::bump(&self.counters.failures);
                    tracing::debug!(key = %key, error = %source, "statistic computation failed");
                    return Err(ExecutionError::ComputationFailed {
                        key: key.to_string(),
                        source,
                    }
                    .into());
                }
            }
        };
        drop(lock);

        // The value is already served from memory; a failed save only costs a
        // recomputation in another process.
        if let Err(e) = self.store.save(key, &computed) {
            tracing::warn!(key = %key, error = %e, "failed to save computed value");
        }

        if let Some(limit) = self.config.prune_locks_above {
            if self.locks.len() > limit {
                self.prune_idle_locks();
            }
        }
        Ok(computed)
    }

    fn lock_for(&self, key: &ComputationKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(*key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Removes lock entries no caller currently holds. Returns how many were
    /// removed.
    ///
    /// A caller that later recreates a pruned lock still re-checks memory
    /// under it, so no computation is repeated.
    pub fn prune_idle_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before.saturating_sub(self.locks.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.locks.len(), "pruned idle key locks");
        }
        removed
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// True if `key` is in the in-process map.
    #[must_use]
    pub fn contains(&self, key: &ComputationKey) -> bool {
        self.values.contains_key(key)
    }

    /// Number of values held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of per-key locks in the lock table.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

impl std::fmt::Debug for DogpileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DogpileCache")
            .field("values", &self.values.len())
            .field("locks", &self.locks.len())
            .field("config", &self.config)
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}
