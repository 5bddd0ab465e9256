//! Computed statistic values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one statistic computation.
///
/// `value` is `None` when the aggregation legitimately found no data (for
/// example a subject whose accounts have no readings yet). Such empty results
/// are cached like any other value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedValue {
    /// The number, if any data was available.
    pub value: Option<f64>,
    /// When the computation finished.
    pub computed_at: DateTime<Utc>,
    /// Free-form description of how the value was obtained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

impl ComputedValue {
    /// A value computed now.
    #[must_use]
    pub fn of(value: f64) -> Self {
        Self {
            value: Some(value),
            computed_at: Utc::now(),
            provenance: None,
        }
    }

    /// An empty result computed now.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            value: None,
            computed_at: Utc::now(),
            provenance: None,
        }
    }

    /// Attaches provenance.
    #[must_use]
    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }

    /// Returns true when no data was available.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// The number if present and finite.
    #[must_use]
    pub fn finite(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite())
    }
}
