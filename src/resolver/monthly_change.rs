use chrono::NaiveDate;

use crate::error::{MeterResult, ValidationError};
use crate::ids::AccountId;
use crate::measurement::{DataField, DeviceType, Metric, Statistic};
use crate::message::{MessageType, Parameters};
use crate::period::{DateWindow, Period};
use crate::query::DataQuery;

use super::{truncate_to_i64, FiringResult, ResolutionContext, Resolver, ResolverDescriptor};

/// Percent-change limits of [`MonthlyChangeAlert`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeThresholds {
    /// Changes above this fire only while consumption stays below average.
    pub threshold: f64,
    /// Changes above this always fire.
    pub high: f64,
}

impl ChangeThresholds {
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDescriptor` unless both limits are
    /// finite and `threshold < high`.
    pub fn new(threshold: f64, high: f64) -> Result<Self, ValidationError> {
        if !threshold.is_finite() || !high.is_finite() || threshold >= high {
            return Err(ValidationError::InvalidDescriptor {
                message_type: MessageType::MonthlyConsumptionChange,
                reason: format!("threshold ({threshold}) must be below high ({high})"),
            });
        }
        Ok(Self { threshold, high })
    }

    /// True if a `percent_change` fires given whether consumption is below
    /// the population average.
    #[must_use]
    pub fn fires(&self, percent_change: f64, below_average: bool) -> bool {
        percent_change > self.high || (percent_change > self.threshold && below_average)
    }
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            high: 25.0,
        }
    }
}

/// Alerts when last month's meter consumption changed notably against the
/// month before.
///
/// Runs on the first day of each month. A moderate increase is excused when
/// the account still consumes less than the population average.
#[derive(Debug, Clone)]
pub struct MonthlyChangeAlert {
    descriptor: ResolverDescriptor,
    thresholds: ChangeThresholds,
}

impl MonthlyChangeAlert {
    #[must_use]
    pub fn new(thresholds: ChangeThresholds) -> Self {
        Self {
            descriptor: ResolverDescriptor::monthly(1, [DeviceType::Meter]),
            thresholds,
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> ChangeThresholds {
        self.thresholds
    }

    fn month_volume(ctx: &ResolutionContext<'_>, account: AccountId, window: DateWindow) -> MeterResult<Option<f64>> {
        let query = DataQuery::builder()
            .account(account)
            .meter()
            .window(window)
            .sum()
            .build()?;
        let response = ctx.data.execute(&query)?;
        Ok(response
            .facade(DeviceType::Meter)
            .and_then(|s| s.get(DataField::Volume, Metric::Sum))
            .filter(|v| v.is_finite()))
    }

    fn month_before(date: NaiveDate) -> MeterResult<DateWindow> {
        Ok(Period::months(1).window_preceding(date)?)
    }
}

impl Default for MonthlyChangeAlert {
    fn default() -> Self {
        Self::new(ChangeThresholds::default())
    }
}

impl Resolver for MonthlyChangeAlert {
    fn message_type(&self) -> MessageType {
        MessageType::MonthlyConsumptionChange
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
        let Some(average) = ctx
            .statistics
            .value(Statistic::Average, DeviceType::Meter, DataField::Volume)?
        else {
            return Ok(Vec::new());
        };

        let current_window = Self::month_before(ctx.reference_date)?;
        let previous_window = Self::month_before(current_window.start)?;
        let (Some(current), Some(previous)) = (
            Self::month_volume(ctx, account, current_window)?,
            Self::month_volume(ctx, account, previous_window)?,
        ) else {
            return Ok(Vec::new());
        };
        if previous == 0.0 {
            return Ok(Vec::new());
        }

        let percent_change = 100.0 * (current - previous) / previous;
        let fired = self.thresholds.fires(percent_change, current < average);
        tracing::trace!(
            account = %account,
            current,
            previous,
            average,
            percent_change,
            fired,
            "evaluated monthly consumption change"
        );

        let parameters = Parameters::for_reference(ctx.reference_date, device)
            .with("value", current)
            .with("consumption", current.round())
            .with("previous_value", previous)
            .with("previous_consumption", previous.round())
            .with("average_value", average)
            .with("average_consumption", average.round())
            .with("percent_change", truncate_to_i64(percent_change));

        Ok(vec![if fired {
            FiringResult::fired(parameters)
        } else {
            FiringResult::not_fired(parameters)
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_below_both_thresholds_does_not_fire() {
        let t = ChangeThresholds::default();
        let change = 100.0 * (80.0 - 100.0) / 100.0;
        assert!(!t.fires(change, 80.0 < 150.0));
    }

    #[test]
    fn large_increase_fires_regardless_of_average() {
        let t = ChangeThresholds::default();
        let change = 100.0 * (140.0 - 100.0) / 100.0;
        assert!(t.fires(change, true));
        assert!(t.fires(change, false));
    }

    #[test]
    fn moderate_increase_fires_only_below_average() {
        let t = ChangeThresholds::default();
        assert!(t.fires(15.0, true));
        assert!(!t.fires(15.0, false));
        assert!(!t.fires(10.0, true));
    }

    #[test]
    fn thresholds_are_validated() {
        assert!(ChangeThresholds::new(10.0, 25.0).is_ok());
        assert!(ChangeThresholds::new(25.0, 10.0).is_err());
        assert!(ChangeThresholds::new(f64::NAN, 10.0).is_err());
    }

    #[test]
    fn descriptor() {
        let alert = MonthlyChangeAlert::default();
        let d = alert.descriptor();
        assert_eq!(d.period, Period::months(1));
        assert_eq!(d.day_of_period, 1);
        assert_eq!(d.max_per_period, 1);
        assert!(alert.supported_devices().contains(&DeviceType::Meter));
        assert!(!alert.supported_devices().contains(&DeviceType::Amphiro));
    }
}
