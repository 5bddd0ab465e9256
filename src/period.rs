//! Calendar periods and date windows.
//!
//! A `Period` is the date part of an ISO-8601 duration (`P1M`, `P1Y2M`, `P2W`).
//! Periods are anchored at the start of the bucket of their coarsest unit
//! (Jan 1, first of month, Monday, or the day itself), which is what makes
//! reference dates comparable at the granularity the period implies.

use std::fmt;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Coarsest unit of a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    /// Calendar day.
    Day,
    /// ISO week, starting on Monday.
    Week,
    /// Calendar month.
    Month,
    /// Calendar year.
    Year,
}

/// A calendar duration: years, months, weeks and days.
///
/// # Examples
///
/// ```
/// use meterstat::Period;
///
/// let p = Period::parse("P1M").unwrap();
/// assert_eq!(p, Period::months(1));
/// assert_eq!(p.to_string(), "P1M");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    years: u32,
    months: u32,
    weeks: u32,
    days: u32,
}

impl Period {
    /// A period of `n` days.
    #[must_use]
    pub const fn days(n: u32) -> Self {
        Self { years: 0, months: 0, weeks: 0, days: n }
    }

    /// A period of `n` weeks.
    #[must_use]
    pub const fn weeks(n: u32) -> Self {
        Self { years: 0, months: 0, weeks: n, days: 0 }
    }

    /// A period of `n` months.
    #[must_use]
    pub const fn months(n: u32) -> Self {
        Self { years: 0, months: n, weeks: 0, days: 0 }
    }

    /// A period of `n` years.
    #[must_use]
    pub const fn years(n: u32) -> Self {
        Self { years: n, months: 0, weeks: 0, days: 0 }
    }

    /// Parses the `PnYnMnWnD` subset of ISO-8601 durations.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidPeriod` for time components, unknown
    /// or out-of-order designators, and zero-length periods.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidPeriod {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let body = input
            .trim()
            .strip_prefix('P')
            .ok_or_else(|| invalid("must start with 'P'"))?;
        if body.contains('T') {
            return Err(invalid("time components are not supported"));
        }
        if body.is_empty() {
            return Err(invalid("no components"));
        }

        let mut period = Self::default();
        let mut digits = String::new();
        let mut last_rank = 0u8;
        for ch in body.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                continue;
            }
            let rank = match ch {
                'Y' => 1,
                'M' => 2,
                'W' => 3,
                'D' => 4,
                _ => return Err(invalid(&format!("unknown designator '{ch}'"))),
            };
            if rank <= last_rank {
                return Err(invalid("designators out of order"));
            }
            if digits.is_empty() {
                return Err(invalid(&format!("missing number before '{ch}'")));
            }
            let n: u32 = digits.parse().map_err(|_| invalid("number out of range"))?;
            match ch {
                'Y' => period.years = n,
                'M' => period.months = n,
                'W' => period.weeks = n,
                _ => period.days = n,
            }
            digits.clear();
            last_rank = rank;
        }
        if !digits.is_empty() {
            return Err(invalid("trailing number without designator"));
        }
        if period.is_zero() {
            return Err(invalid("period must be non-zero"));
        }
        Ok(period)
    }

    /// Returns true if every component is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.years == 0 && self.months == 0 && self.weeks == 0 && self.days == 0
    }

    /// The coarsest non-zero unit.
    #[must_use]
    pub const fn granularity(&self) -> Granularity {
        if self.years > 0 {
            Granularity::Year
        } else if self.months > 0 {
            Granularity::Month
        } else if self.weeks > 0 {
            Granularity::Week
        } else {
            Granularity::Day
        }
    }

    /// Start of the granularity bucket containing `date`.
    #[must_use]
    pub fn truncate(&self, date: NaiveDate) -> NaiveDate {
        match self.granularity() {
            Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
            Granularity::Month => date.with_day(1).unwrap_or(date),
            Granularity::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            Granularity::Day => date,
        }
    }

    /// `date + self`. Month arithmetic clamps to the end of the month.
    #[must_use]
    pub fn add_to(&self, date: NaiveDate) -> Option<NaiveDate> {
        let months = self.years.checked_mul(12)?.checked_add(self.months)?;
        let days = u64::from(self.weeks) * 7 + u64::from(self.days);
        date.checked_add_months(Months::new(months))?
            .checked_add_days(Days::new(days))
    }

    /// `date - self`. Month arithmetic clamps to the end of the month.
    #[must_use]
    pub fn subtract_from(&self, date: NaiveDate) -> Option<NaiveDate> {
        let months = self.years.checked_mul(12)?.checked_add(self.months)?;
        let days = u64::from(self.weeks) * 7 + u64::from(self.days);
        date.checked_sub_months(Months::new(months))?
            .checked_sub_days(Days::new(days))
    }

    /// The period window starting at the bucket that contains `date`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DateOutOfRange` on calendar overflow.
    pub fn window_containing(&self, date: NaiveDate) -> Result<DateWindow, ValidationError> {
        let start = self.truncate(date);
        let end = self
            .add_to(start)
            .ok_or(ValidationError::DateOutOfRange { date: start })?;
        DateWindow::new(start, end)
    }

    /// The period window that ends where the window containing `date` starts.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DateOutOfRange` on calendar overflow.
    pub fn window_preceding(&self, date: NaiveDate) -> Result<DateWindow, ValidationError> {
        let end = self.truncate(date);
        let start = self
            .subtract_from(end)
            .ok_or(ValidationError::DateOutOfRange { date: end })?;
        DateWindow::new(start, end)
    }

    /// 1-based index of `date` within its containing window.
    ///
    /// Day of month for monthly periods, ISO weekday for weekly periods.
    #[must_use]
    pub fn day_of_period(&self, date: NaiveDate) -> u32 {
        let start = self.truncate(date);
        let offset = date.signed_duration_since(start).num_days();
        u32::try_from(offset).map_or(1, |d| d + 1)
    }
}

impl Default for Period {
    fn default() -> Self {
        Self { years: 0, months: 0, weeks: 0, days: 0 }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P")?;
        if self.is_zero() {
            return write!(f, "0D");
        }
        if self.years > 0 {
            write!(f, "{}Y", self.years)?;
        }
        if self.months > 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.weeks > 0 {
            write!(f, "{}W", self.weeks)?;
        }
        if self.days > 0 {
            write!(f, "{}D", self.days)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Period {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

/// Half-open range of calendar dates: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    /// First date in the window (inclusive).
    pub start: NaiveDate,
    /// First date after the window (exclusive).
    pub end: NaiveDate,
}

impl DateWindow {
    /// Creates a window.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidWindow` if `start >= end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Returns true if `date` falls within the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Number of days covered.
    #[must_use]
    pub fn len_days(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
