//! # meterstat - consumption statistics and message resolution
//!
//! meterstat computes population statistics over utility consumption data
//! (smart water meters, shower devices), caches them so that each statistic is
//! computed at most once per process even under heavy concurrency, and uses
//! them to decide per account whether an alert or recommendation fires.
//!
//! ## Core Concepts
//!
//! - **ComputationKey**: identity of a statistic (subject, reference date,
//!   period, field, statistic)
//! - **DogpileCache**: single-flight cache in front of a durable store and an
//!   aggregation service
//! - **Resolver**: a message rule evaluated for one account
//! - **ResolutionEngine**: runs resolvers with cadence, quota and persistence
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::NaiveDate;
//! use meterstat::{
//!     AccountId, DataField, DeviceType, DogpileCache, EngineConfig, InMemoryComputedValueStore,
//!     InMemoryDataService, InMemoryMessageStore, QueryAggregationService, ResolutionEngine,
//!     ResolverRegistry, SubjectId,
//! };
//!
//! let data = Arc::new(InMemoryDataService::new());
//! let subject = SubjectId::new();
//! let account = AccountId::new();
//! data.enroll(account, subject);
//! data.record(account, DeviceType::Meter, NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(), &[(DataField::Volume, 130.0)]);
//!
//! let cache = Arc::new(DogpileCache::new(
//!     Arc::new(InMemoryComputedValueStore::new()),
//!     Arc::new(QueryAggregationService::new(Arc::clone(&data))),
//! ));
//! let engine = ResolutionEngine::new(
//!     ResolverRegistry::standard(),
//!     cache,
//!     data,
//!     Arc::new(InMemoryMessageStore::new()),
//!     EngineConfig::default(),
//! );
//!
//! let report = engine.resolve_account(account, subject, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), &[DeviceType::Meter]);
//! assert!(report.failures().is_empty());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Vocabulary
pub mod error;
pub mod ids;
pub mod key;
pub mod measurement;
pub mod message;
pub mod period;
pub mod value;

// Collaborators
pub mod aggregation;
pub mod query;
pub mod storage;

// Cache and resolution
pub mod cache;
pub mod engine;
pub mod resolver;
pub mod statistics;

pub mod config;
pub mod logging;

// Re-export primary types at crate root for convenience
pub use aggregation::{AggregationError, AggregationService, QueryAggregationService};
pub use cache::{CacheStats, DogpileCache};
pub use config::{CacheConfig, EngineConfig, MeterConfig, PersistentConfig, RuntimeConfig};
pub use engine::runtime::{ResolutionHandle, ResolutionJob, ResolutionRuntime};
pub use engine::{Outcome, ResolutionEngine, ResolutionReport};
pub use error::{ExecutionError, MeterError, MeterResult, ValidationError};
pub use ids::{AccountId, MessageId, SubjectId};
pub use key::ComputationKey;
pub use logging::init_tracing;
pub use measurement::{DataField, DeviceType, MeasurementField, Metric, Statistic};
pub use message::{MessageKind, MessageRecord, MessageType, Parameters};
pub use period::{DateWindow, Granularity, Period};
pub use query::{DataQuery, DataQueryBuilder, DataService, Population, QueryError, QueryResponse, SeriesFacade};
pub use resolver::{
    ChangeThresholds, FiringResult, LessShowerTimeRecommendation, MonthlyChangeAlert, ResolutionContext, Resolver,
    ResolverDescriptor, ResolverRegistry,
};
pub use statistics::ConsumptionStatistics;
pub use storage::{
    ComputedValueStore, InMemoryComputedValueStore, InMemoryDataService, InMemoryMessageStore,
    MessageStore, StorageError,
};
pub use value::ComputedValue;
