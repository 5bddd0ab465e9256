//! Message resolvers.
//!
//! A resolver inspects one account's consumption against population
//! statistics and decides whether its message fires. Resolvers are pure:
//! the engine owns cadence, quota and persistence.

mod monthly_change;
mod registry;
mod shower_time;

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{MeterResult, ValidationError};
use crate::ids::AccountId;
use crate::measurement::DeviceType;
use crate::message::{MessageType, Parameters};
use crate::period::{DateWindow, Period};
use crate::query::DataService;
use crate::statistics::ConsumptionStatistics;

pub use monthly_change::{ChangeThresholds, MonthlyChangeAlert};
pub use registry::ResolverRegistry;
pub use shower_time::LessShowerTimeRecommendation;

/// Scheduling and quota metadata of a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverDescriptor {
    /// Cadence period (`P1M` for monthly resolvers).
    pub period: Period,
    /// 1-based day within the period on which the resolver runs.
    pub day_of_period: u32,
    /// Maximum messages per account within one period window.
    pub max_per_period: u32,
    pub supported_devices: BTreeSet<DeviceType>,
}

impl ResolverDescriptor {
    /// Monthly cadence on `day_of_month`, at most one message a month.
    #[must_use]
    pub fn monthly(day_of_month: u32, devices: impl IntoIterator<Item = DeviceType>) -> Self {
        Self {
            period: Period::months(1),
            day_of_period: day_of_month,
            max_per_period: 1,
            supported_devices: devices.into_iter().collect(),
        }
    }

    /// Checks the descriptor of `message_type`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDescriptor` for a zero period, day or
    /// quota, or an empty device set.
    pub fn validate(&self, message_type: MessageType) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidDescriptor {
            message_type,
            reason: reason.to_string(),
        };
        if self.period.is_zero() {
            return Err(invalid("period must not be zero"));
        }
        if self.day_of_period == 0 {
            return Err(invalid("day_of_period must be at least 1"));
        }
        if self.max_per_period == 0 {
            return Err(invalid("max_per_period must be at least 1"));
        }
        if self.supported_devices.is_empty() {
            return Err(invalid("supported_devices must not be empty"));
        }
        Ok(())
    }

    /// True if the resolver runs on `date`.
    #[must_use]
    pub fn is_due(&self, date: NaiveDate) -> bool {
        self.period.day_of_period(date) == self.day_of_period
    }

    /// Quota window containing `date`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DateOutOfRange` on calendar overflow.
    pub fn window(&self, date: NaiveDate) -> Result<DateWindow, ValidationError> {
        self.period.window_containing(date)
    }
}

/// Outcome of one resolver evaluation for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct FiringResult {
    pub fired: bool,
    pub parameters: Parameters,
}

impl FiringResult {
    #[must_use]
    pub fn fired(parameters: Parameters) -> Self {
        Self {
            fired: true,
            parameters,
        }
    }

    /// An evaluated condition that did not hold; parameters are diagnostic.
    #[must_use]
    pub fn not_fired(parameters: Parameters) -> Self {
        Self {
            fired: false,
            parameters,
        }
    }
}

/// Inputs shared by every resolver in one resolution pass.
#[derive(Clone)]
pub struct ResolutionContext<'a> {
    pub reference_date: NaiveDate,
    pub statistics: ConsumptionStatistics,
    pub data: &'a dyn DataService,
}

impl std::fmt::Debug for ResolutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionContext")
            .field("reference_date", &self.reference_date)
            .field("statistics", &self.statistics)
            .finish_non_exhaustive()
    }
}

/// A message rule.
///
/// `resolve` returns an empty vector when the data needed to decide is
/// missing; errors are reserved for failures of the collaborators.
pub trait Resolver: Send + Sync {
    fn message_type(&self) -> MessageType;

    fn descriptor(&self) -> &ResolverDescriptor;

    fn supported_devices(&self) -> &BTreeSet<DeviceType> {
        &self.descriptor().supported_devices
    }

    /// Evaluates the rule for `account` on `device`.
    ///
    /// # Errors
    ///
    /// Propagates statistics and data-service failures.
    fn resolve(
        &self,
        ctx: &ResolutionContext<'_>,
        account: AccountId,
        device: DeviceType,
    ) -> MeterResult<Vec<FiringResult>>;
}

/// Truncates toward zero, saturating at the `i64` range.
pub(crate) fn truncate_to_i64(value: f64) -> i64 {
    // `as` saturates and maps NaN to 0.
    value.trunc() as i64
}
