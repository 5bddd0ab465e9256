use crate::error::{MeterResult, ValidationError};
use crate::ids::AccountId;
use crate::measurement::{DataField, DeviceType, Metric, Statistic};
use crate::message::{MessageType, Parameters};
use crate::period::Period;
use crate::query::DataQuery;

use super::{truncate_to_i64, FiringResult, ResolutionContext, Resolver, ResolverDescriptor};

const MONTHS_PER_YEAR: f64 = 12.0;
const SECONDS_PER_MINUTE: f64 = 60.0;

/// Recommends shorter showers to accounts whose showers are both much longer
/// and more water-hungry than the population's.
///
/// Runs on the second day of each month over the three full months before
/// the reference month.
#[derive(Debug, Clone)]
pub struct LessShowerTimeRecommendation {
    descriptor: ResolverDescriptor,
    duration_ratio: f64,
    months: u32,
}

impl LessShowerTimeRecommendation {
    /// Duration multiple of the population average above which a shower
    /// counts as long.
    pub const DEFAULT_DURATION_RATIO: f64 = 1.5;

    /// Months of history examined.
    pub const DEFAULT_MONTHS: u32 = 3;

    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDescriptor` unless `duration_ratio` is
    /// finite and positive and `months` is at least 1.
    pub fn new(duration_ratio: f64, months: u32) -> Result<Self, ValidationError> {
        let reason = if !duration_ratio.is_finite() || duration_ratio <= 0.0 {
            format!("duration ratio ({duration_ratio}) must be a positive number")
        } else if months == 0 {
            "at least one month of history is required".to_string()
        } else {
            return Ok(Self {
                descriptor: ResolverDescriptor::monthly(2, [DeviceType::Amphiro]),
                duration_ratio,
                months,
            });
        };
        Err(ValidationError::InvalidDescriptor {
            message_type: MessageType::LessShowerTime,
            reason,
        })
    }

    #[must_use]
    pub const fn duration_ratio(&self) -> f64 {
        self.duration_ratio
    }

    /// Both conditions must hold; a long shower with little water is noise.
    #[must_use]
    pub fn fires(&self, user_duration: f64, user_consumption: f64, avg_duration: f64, avg_consumption: f64) -> bool {
        user_duration > avg_duration * self.duration_ratio && user_consumption > avg_consumption
    }

    /// Yearly litres saved by showering one minute less.
    #[must_use]
    pub fn annual_savings(user_consumption: f64, user_duration: f64) -> i64 {
        truncate_to_i64(MONTHS_PER_YEAR * user_consumption * (SECONDS_PER_MINUTE / user_duration))
    }
}

impl Default for LessShowerTimeRecommendation {
    fn default() -> Self {
        Self {
            descriptor: ResolverDescriptor::monthly(2, [DeviceType::Amphiro]),
            duration_ratio: Self::DEFAULT_DURATION_RATIO,
            months: Self::DEFAULT_MONTHS,
        }
    }
}

impl Resolver for LessShowerTimeRecommendation {
    fn message_type(&self) -> MessageType {
        MessageType::LessShowerTime
    }

    fn descriptor(&self) -> &ResolverDescriptor {
        &self.descriptor
    }

    fn resolve(
        &self,
        ctx: &ResolutionContext<'_>,
        account: AccountId,
        device: DeviceType,
    ) -> MeterResult<Vec<FiringResult>> {
        let month = Period::months(1);
        let stat = |field| ctx.statistics.value(Statistic::Average, DeviceType::Amphiro, field);
        let (Some(avg_duration), Some(avg_consumption)) = (stat(DataField::Duration)?, stat(DataField::Volume)?)
        else {
            return Ok(Vec::new());
        };
        if avg_duration == 0.0 || avg_consumption == 0.0 {
            return Ok(Vec::new());
        }

        let start = Period::months(self.months)
            .subtract_from(month.truncate(ctx.reference_date))
            .ok_or(ValidationError::DateOutOfRange {
                date: ctx.reference_date,
            })?;
        let query = DataQuery::builder()
            .account(account)
            .amphiro()
            .sliding(start, self.months, month)?
            .sum()
            .average()
            .build()?;
        let response = ctx.data.execute(&query)?;
        let Some(series) = response.facade(DeviceType::Amphiro).filter(|s| !s.is_empty()) else {
            return Ok(Vec::new());
        };
        let (Some(volume), Some(user_duration)) = (
            series.get(DataField::Volume, Metric::Sum),
            series.get(DataField::Duration, Metric::Average),
        ) else {
            return Ok(Vec::new());
        };

        let user_consumption = volume / f64::from(self.months);
        if !self.fires(user_duration, user_consumption, avg_duration, avg_consumption) {
            tracing::trace!(account = %account, user_duration, user_consumption, "shower time within range");
            return Ok(Vec::new());
        }

        // Firing implies user_duration > 0, so the savings estimate is defined.
        let savings = Self::annual_savings(user_consumption, user_duration);
        let parameters = Parameters::for_reference(ctx.reference_date, device)
            .with("user_average_consumption", user_consumption)
            .with("user_average_duration", user_duration)
            .with("average_consumption", avg_consumption)
            .with("average_duration", avg_duration)
            .with("annual_savings_1", savings)
            .with("annual_savings_2", savings.saturating_mul(2))
            .with(
                "percent_above_duration",
                100.0 * (user_duration - avg_duration) / avg_duration,
            )
            .with(
                "percent_above_consumption",
                100.0 * (user_consumption - avg_consumption) / avg_consumption,
            );
        Ok(vec![FiringResult::fired(parameters)])
    }
}
