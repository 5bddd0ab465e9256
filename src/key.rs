//! Identity of a cached computation.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::SubjectId;
use crate::measurement::{MeasurementField, Statistic};
use crate::period::{DateWindow, Period};

/// Composite key identifying one statistic computation.
///
/// The reference date is truncated to the granularity of `period` on
/// construction, so two keys built from dates in the same bucket are equal.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use meterstat::{ComputationKey, DataField, DeviceType, MeasurementField, Period, Statistic, SubjectId};
///
/// let subject = SubjectId::new();
/// let field = MeasurementField::new(DeviceType::Meter, DataField::Volume);
/// let a = ComputationKey::new(subject, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), Period::months(1), field, Statistic::Average);
/// let b = ComputationKey::new(subject, NaiveDate::from_ymd_opt(2024, 3, 17).unwrap(), Period::months(1), field, Statistic::Average);
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputationKey {
    subject: SubjectId,
    reference_date: NaiveDate,
    period: Period,
    field: MeasurementField,
    statistic: Statistic,
}

impl ComputationKey {
    /// Creates a key, truncating `reference_date` to the period granularity.
    #[must_use]
    pub fn new(
        subject: SubjectId,
        reference_date: NaiveDate,
        period: Period,
        field: MeasurementField,
        statistic: Statistic,
    ) -> Self {
        Self {
            subject,
            reference_date: period.truncate(reference_date),
            period,
            field,
            statistic,
        }
    }

    /// Subject the statistic is computed over.
    #[must_use]
    pub const fn subject(&self) -> SubjectId {
        self.subject
    }

    /// Truncated reference date.
    #[must_use]
    pub const fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    #[must_use]
    pub const fn period(&self) -> Period {
        self.period
    }

    #[must_use]
    pub const fn field(&self) -> MeasurementField {
        self.field
    }

    #[must_use]
    pub const fn statistic(&self) -> Statistic {
        self.statistic
    }

    /// Window the statistic aggregates over: the full period preceding the
    /// reference date.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DateOutOfRange` on calendar overflow.
    pub fn window(&self) -> Result<DateWindow, ValidationError> {
        self.period.window_preceding(self.reference_date)
    }

    /// Stable BLAKE3 digest of the canonical form, as lowercase hex.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.to_string().as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for ComputationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.subject,
            self.reference_date.format("%Y%m%d"),
            self.period,
            self.field,
            self.statistic
        )
    }
}
