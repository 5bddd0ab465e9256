//! Population statistics as seen by resolvers.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::cache::DogpileCache;
use crate::error::MeterResult;
use crate::ids::SubjectId;
use crate::key::ComputationKey;
use crate::measurement::{DataField, DeviceType, MeasurementField, Statistic};
use crate::period::Period;

/// Statistics of one subject at one reference date, read through the cache.
#[derive(Debug, Clone)]
pub struct ConsumptionStatistics {
    cache: Arc<DogpileCache>,
    subject: SubjectId,
    reference_date: NaiveDate,
    period: Period,
}

impl ConsumptionStatistics {
    #[must_use]
    pub fn new(cache: Arc<DogpileCache>, subject: SubjectId, reference_date: NaiveDate, period: Period) -> Self {
        Self {
            cache,
            subject,
            reference_date,
            period,
        }
    }

    #[must_use]
    pub const fn subject(&self) -> SubjectId {
        self.subject
    }

    #[must_use]
    pub const fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    #[must_use]
    pub const fn period(&self) -> Period {
        self.period
    }

    /// The statistic over the bound period, or `None` if the population has
    /// no (finite) data for it.
    ///
    /// # Errors
    ///
    /// Propagates cache errors (store failures, failed computations).
    pub fn value(&self, statistic: Statistic, device: DeviceType, field: DataField) -> MeterResult<Option<f64>> {
        self.value_for(self.period, statistic, device, field)
    }

    /// Like [`value`](Self::value) over an explicit period.
    ///
    /// # Errors
    ///
    /// Propagates cache errors (store failures, failed computations).
    pub fn value_for(
        &self,
        period: Period,
        statistic: Statistic,
        device: DeviceType,
        field: DataField,
    ) -> MeterResult<Option<f64>> {
        let key = ComputationKey::new(
            self.subject,
            self.reference_date,
            period,
            MeasurementField::new(device, field),
            statistic,
        );
        Ok(self.cache.get(&key)?.finite())
    }
}
