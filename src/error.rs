//! Error types for meterstat.
//!
//! All errors are strongly typed using thiserror. Absence of data is never an
//! error: statistics report it as `None` and resolvers as an empty result.

use thiserror::Error;

use crate::aggregation::AggregationError;
use crate::ids::MessageId;
use crate::message::MessageType;

/// Validation errors that occur while building keys, queries or registries.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid period '{input}': {reason}")]
    InvalidPeriod {
        input: String,
        reason: String,
    },

    #[error("Invalid date window: start ({start}) must be before end ({end})")]
    InvalidWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Date arithmetic out of range at {date}")]
    DateOutOfRange {
        date: chrono::NaiveDate,
    },

    #[error("Percentile {value} is out of range [1, 100]")]
    InvalidPercentile {
        value: u8,
    },

    #[error("Invalid resolver descriptor for {message_type}: {reason}")]
    InvalidDescriptor {
        message_type: MessageType,
        reason: String,
    },

    #[error("A resolver for {message_type} is already registered")]
    DuplicateResolver {
        message_type: MessageType,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors raised while computing statistics or resolving messages.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Computation of '{key}' failed: {source}")]
    ComputationFailed {
        key: String,
        source: AggregationError,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Query error: {message}")]
    Query {
        message: String,
    },

    #[error("Resolver {message_type} failed: {reason}")]
    ResolverFailed {
        message_type: MessageType,
        reason: String,
    },

    #[error("Message {id} was already acknowledged")]
    AlreadyAcknowledged {
        id: MessageId,
    },

    #[error("Message not found: {id}")]
    MessageNotFound {
        id: MessageId,
    },

    #[error("Queue full on {pool} (capacity: {capacity})")]
    QueueFull {
        pool: String,
        capacity: usize,
    },

    #[error("Worker pool {pool} disconnected")]
    Disconnected {
        pool: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for meterstat.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MeterError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Failed computations leave no cache state behind, so they are retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::ComputationFailed { .. }
                    | ExecutionError::Storage { .. }
                    | ExecutionError::Timeout { .. }
                    | ExecutionError::QueueFull { .. }
            ),
        }
    }
}

impl From<crate::storage::StorageError> for MeterError {
    fn from(err: crate::storage::StorageError) -> Self {
        Self::Execution(ExecutionError::Storage {
            message: err.to_string(),
        })
    }
}

impl From<crate::query::QueryError> for MeterError {
    fn from(err: crate::query::QueryError) -> Self {
        Self::Execution(ExecutionError::Query {
            message: err.to_string(),
        })
    }
}

/// Result type alias for meterstat operations.
pub type MeterResult<T> = Result<T, MeterError>;
