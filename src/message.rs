//! Alert and recommendation messages.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, MeterError};
use crate::ids::{AccountId, MessageId};
use crate::measurement::DeviceType;

/// Broad category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Something the user should know about now.
    Alert,
    /// Advice on how to consume less.
    Recommendation,
}

/// Template identifier of a message, one per resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Monthly meter consumption changed notably against the previous month.
    MonthlyConsumptionChange,
    /// Showers are much longer than the population average.
    LessShowerTime,
}

impl MessageType {
    /// Category of this message type.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::MonthlyConsumptionChange => MessageKind::Alert,
            Self::LessShowerTime => MessageKind::Recommendation,
        }
    }

    /// Stable template code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MonthlyConsumptionChange => "MONTHLY_CONSUMPTION_CHANGE",
            Self::LessShowerTime => "LESS_SHOWER_TIME",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Ordered parameter payload attached to a message.
///
/// Insertion order is preserved; inserting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Vec<(String, serde_json::Value)>);

impl Parameters {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a payload carrying the common `reference_date` and
    /// `device_type` entries.
    #[must_use]
    pub fn for_reference(reference_date: NaiveDate, device: DeviceType) -> Self {
        Self::new()
            .with("reference_date", reference_date.to_string())
            .with("device_type", device.as_str())
    }

    /// Sets `key` to `value`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Numeric value of `key`, if it is a number.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A fired alert or recommendation for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Identity.
    pub id: MessageId,
    /// Receiving account.
    pub account: AccountId,
    /// Template.
    pub message_type: MessageType,
    /// When the engine persisted the message.
    pub created_on: DateTime<Utc>,
    /// When the user acknowledged the message, if ever.
    pub acknowledged_on: Option<DateTime<Utc>>,
    /// Reference date of the resolution pass that fired it.
    pub reference_date: NaiveDate,
    /// Template parameters.
    pub parameters: Parameters,
}

impl MessageRecord {
    /// Creates an unacknowledged record.
    #[must_use]
    pub fn new(
        account: AccountId,
        message_type: MessageType,
        reference_date: NaiveDate,
        parameters: Parameters,
    ) -> Self {
        Self {
            id: MessageId::new(),
            account,
            message_type,
            created_on: Utc::now(),
            acknowledged_on: None,
            reference_date,
            parameters,
        }
    }

    /// Records the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AlreadyAcknowledged` on a second call.
    pub fn acknowledge(&mut self, at: DateTime<Utc>) -> Result<(), MeterError> {
        if self.acknowledged_on.is_some() {
            return Err(ExecutionError::AlreadyAcknowledged { id: self.id }.into());
        }
        self.acknowledged_on = Some(at);
        Ok(())
    }

    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        self.acknowledged_on.is_some()
    }
}
