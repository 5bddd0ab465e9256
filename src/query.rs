//! Time-series query contract.
//!
//! Resolvers and the aggregation service ask the time-series store for
//! per-account reductions over a date window. The store itself is an external
//! collaborator behind [`DataService`].

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;
use crate::ids::{AccountId, SubjectId};
use crate::measurement::{DataField, DeviceType, Metric};
use crate::period::{DateWindow, Period};

/// Errors returned by a data service.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The backend rejects the population outright (for example an unknown
    /// utility in a remote store).
    #[error("Unknown population: {0}")]
    UnknownPopulation(String),

    /// Backend failure (I/O, timeout, ...).
    #[error("Data backend error: {0}")]
    Backend(String),
}

/// Which accounts a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Population {
    /// One account.
    Account(AccountId),
    /// Every account enrolled with a subject.
    Subject(SubjectId),
}

/// A per-account reduction request over a date window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQuery {
    /// Accounts covered.
    pub population: Population,
    /// Device whose series is reduced.
    pub device: DeviceType,
    /// Dates covered.
    pub window: DateWindow,
    /// Reductions applied to every field.
    pub metrics: Vec<Metric>,
}

impl DataQuery {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> DataQueryBuilder {
        DataQueryBuilder::default()
    }
}

/// Builder for [`DataQuery`].
///
/// The builder is reusable: `build` borrows, so the same population and
/// metrics can be queried over several windows.
#[derive(Debug, Clone, Default)]
pub struct DataQueryBuilder {
    population: Option<Population>,
    device: Option<DeviceType>,
    window: Option<DateWindow>,
    metrics: Vec<Metric>,
}

impl DataQueryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn account(mut self, account: AccountId) -> Self {
        self.population = Some(Population::Account(account));
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: SubjectId) -> Self {
        self.population = Some(Population::Subject(subject));
        self
    }

    #[must_use]
    pub fn device(mut self, device: DeviceType) -> Self {
        self.device = Some(device);
        self
    }

    #[must_use]
    pub fn meter(self) -> Self {
        self.device(DeviceType::Meter)
    }

    #[must_use]
    pub fn amphiro(self) -> Self {
        self.device(DeviceType::Amphiro)
    }

    #[must_use]
    pub fn window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Sets the window to `count` consecutive periods starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the window is empty or overflows.
    pub fn sliding(mut self, start: NaiveDate, count: u32, period: Period) -> Result<Self, ValidationError> {
        let mut end = start;
        for _ in 0..count {
            end = period
                .add_to(end)
                .ok_or(ValidationError::DateOutOfRange { date: end })?;
        }
        self.window = Some(DateWindow::new(start, end)?);
        Ok(self)
    }

    /// Adds a metric (duplicates are ignored).
    #[must_use]
    pub fn metric(mut self, metric: Metric) -> Self {
        if !self.metrics.contains(&metric) {
            self.metrics.push(metric);
        }
        self
    }

    #[must_use]
    pub fn sum(self) -> Self {
        self.metric(Metric::Sum)
    }

    #[must_use]
    pub fn average(self) -> Self {
        self.metric(Metric::Average)
    }

    /// Builds the query.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingField` when population, device,
    /// window or metrics are missing.
    pub fn build(&self) -> Result<DataQuery, ValidationError> {
        let missing = |field: &str| ValidationError::MissingField {
            field: field.to_string(),
        };
        if self.metrics.is_empty() {
            return Err(missing("metrics"));
        }
        Ok(DataQuery {
            population: self.population.ok_or_else(|| missing("population"))?,
            device: self.device.ok_or_else(|| missing("device"))?,
            window: self.window.ok_or_else(|| missing("window"))?,
            metrics: self.metrics.clone(),
        })
    }
}

/// Reduced values of one account's series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesFacade {
    /// Account the series belongs to.
    pub account: AccountId,
    /// Device that produced the series.
    pub device: DeviceType,
    /// Reduced values keyed by field and metric.
    pub values: BTreeMap<(DataField, Metric), f64>,
}

impl SeriesFacade {
    /// Creates an empty facade.
    #[must_use]
    pub fn new(account: AccountId, device: DeviceType) -> Self {
        Self {
            account,
            device,
            values: BTreeMap::new(),
        }
    }

    /// Reduced value of `field` under `metric`.
    #[must_use]
    pub fn get(&self, field: DataField, metric: Metric) -> Option<f64> {
        self.values.get(&(field, metric)).copied()
    }

    /// Records a reduced value.
    pub fn set(&mut self, field: DataField, metric: Metric, value: f64) {
        self.values.insert((field, metric), value);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Answer to a [`DataQuery`]: one facade per account that had readings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Per-account series.
    pub series: Vec<SeriesFacade>,
}

impl QueryResponse {
    /// First series produced by `device`, if any.
    #[must_use]
    pub fn facade(&self, device: DeviceType) -> Option<&SeriesFacade> {
        self.series.iter().find(|s| s.device == device)
    }

    /// Series of one account.
    #[must_use]
    pub fn for_account(&self, account: AccountId) -> Option<&SeriesFacade> {
        self.series.iter().find(|s| s.account == account)
    }
}

/// Time-series query service.
pub trait DataService: Send + Sync {
    /// Executes a query.
    fn execute(&self, query: &DataQuery) -> Result<QueryResponse, QueryError>;
}
