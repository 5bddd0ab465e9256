//! Aggregation service: computes a statistic from raw time-series data.
//!
//! The cache calls the aggregation service only on a miss. Implementations may
//! be slow (they scan a population's readings), which is what the single-flight
//! cache protects against.

use std::sync::Arc;

use thiserror::Error;

use crate::key::ComputationKey;
use crate::query::{DataQuery, DataService};
use crate::value::ComputedValue;

/// Errors raised by an aggregation service.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The data needed to compute the statistic cannot be obtained.
    #[error("Insufficient data: {reason}")]
    InsufficientData {
        /// Description.
        reason: String,
    },

    /// The underlying time-series query failed.
    #[error("Query failed: {0}")]
    Query(#[from] crate::query::QueryError),

    /// The key cannot be computed by this service.
    #[error("Unsupported computation: {reason}")]
    Unsupported {
        /// Description.
        reason: String,
    },
}

/// Computes statistic values on cache miss.
pub trait AggregationService: Send + Sync {
    /// Computes the value for `key`.
    ///
    /// `Ok(ComputedValue::empty())` means the population has no data for the
    /// key; errors mean the computation itself failed and may be retried.
    fn compute(&self, key: &ComputationKey) -> Result<ComputedValue, AggregationError>;
}

/// Aggregation over a [`DataService`].
///
/// For a key, every account enrolled with the key's subject is reduced over
/// the key window using the field's natural metric (sum of volume, average of
/// duration, ...), and the per-account values are then reduced with the key's
/// statistic.
pub struct QueryAggregationService<D: DataService + ?Sized> {
    data: Arc<D>,
}

impl<D: DataService + ?Sized> QueryAggregationService<D> {
    /// Creates a service reading from `data`.
    #[must_use]
    pub fn new(data: Arc<D>) -> Self {
        Self { data }
    }
}

impl<D: DataService + ?Sized> AggregationService for QueryAggregationService<D> {
    fn compute(&self, key: &ComputationKey) -> Result<ComputedValue, AggregationError> {
        let window = key.window().map_err(|e| AggregationError::Unsupported {
            reason: e.to_string(),
        })?;
        let field = key.field();
        let metric = field.field.natural_metric();

        let query = DataQuery::builder()
            .subject(key.subject())
            .device(field.device)
            .window(window)
            .metric(metric)
            .build()
            .map_err(|e| AggregationError::Unsupported {
                reason: e.to_string(),
            })?;
        let response = self.data.execute(&query)?;

        let per_account: Vec<f64> = response
            .series
            .iter()
            .filter_map(|s| s.get(field.field, metric))
            .filter(|v| v.is_finite())
            .collect();

        let provenance = format!("{window} over {} accounts", per_account.len());
        let computed = match key.statistic().reduce(&per_account) {
            Some(v) => ComputedValue::of(v),
            None => ComputedValue::empty(),
        };
        Ok(computed.with_provenance(provenance))
    }
}
