//! Measurement vocabulary: devices, fields, metrics and statistics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Kind of device that produced a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Smart water meter (periodic cumulative readings).
    Meter,
    /// Shower monitoring device (per-session readings).
    Amphiro,
}

impl DeviceType {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Meter => "meter",
            Self::Amphiro => "amphiro",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured dimension of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataField {
    /// Water volume, litres.
    Volume,
    /// Session duration, seconds.
    Duration,
    /// Energy used to heat water, Wh.
    Energy,
    /// Water temperature, Celsius.
    Temperature,
    /// Flow rate, litres per minute.
    Flow,
}

impl DataField {
    /// Per-account reduction used when a series is summarized into one number.
    ///
    /// Extensive quantities add up; intensive quantities are averaged.
    #[must_use]
    pub const fn natural_metric(&self) -> Metric {
        match self {
            Self::Volume | Self::Energy => Metric::Sum,
            Self::Duration | Self::Temperature | Self::Flow => Metric::Average,
        }
    }

    /// Lower-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Duration => "duration",
            Self::Energy => "energy",
            Self::Temperature => "temperature",
            Self::Flow => "flow",
        }
    }
}

impl fmt::Display for DataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduction applied to the readings of one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Sum of readings.
    Sum,
    /// Arithmetic mean of readings.
    Average,
    /// Smallest reading.
    Min,
    /// Largest reading.
    Max,
    /// Number of readings.
    Count,
}

impl Metric {
    /// Reduces `values`; `None` when empty.
    #[must_use]
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = values.len() as f64;
        let out = match self {
            Self::Sum => values.iter().sum(),
            Self::Average => values.iter().sum::<f64>() / n,
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Count => n,
        };
        Some(out)
    }
}

/// A device-qualified measurement dimension (the "field" of a computation key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MeasurementField {
    /// Device producing the series.
    pub device: DeviceType,
    /// Dimension measured.
    pub field: DataField,
}

impl MeasurementField {
    /// Creates a measurement field.
    #[must_use]
    pub const fn new(device: DeviceType, field: DataField) -> Self {
        Self { device, field }
    }
}

impl fmt::Display for MeasurementField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.field)
    }
}

/// Aggregate computed across the accounts of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// Mean of per-account values.
    Average,
    /// Sum of per-account values.
    Sum,
    /// Smallest per-account value.
    Min,
    /// Largest per-account value.
    Max,
    /// Nearest-rank percentile (1..=100) of per-account values.
    Percentile(u8),
}

impl Statistic {
    /// Creates a percentile statistic.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidPercentile` outside `1..=100`.
    pub fn percentile(p: u8) -> Result<Self, ValidationError> {
        if p == 0 || p > 100 {
            return Err(ValidationError::InvalidPercentile { value: p });
        }
        Ok(Self::Percentile(p))
    }

    /// Reduces per-account values; `None` when there are none.
    #[must_use]
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        match self {
            Self::Average => Metric::Average.reduce(values),
            Self::Sum => Metric::Sum.reduce(values),
            Self::Min => Metric::Min.reduce(values),
            Self::Max => Metric::Max.reduce(values),
            Self::Percentile(p) => {
                if values.is_empty() {
                    return None;
                }
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let p = usize::from((*p).clamp(1, 100));
                // Nearest rank: ceil(p/100 * n), 1-based.
                let rank = (p * sorted.len()).div_ceil(100).max(1);
                sorted.get(rank - 1).copied()
            }
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Average => f.write_str("average"),
            Self::Sum => f.write_str("sum"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Percentile(p) => write!(f, "p{p}"),
        }
    }
}
