//! Abstract storage traits for meterstat.
//!
//! These traits define the contract that storage backends must implement.
//! By using traits, we enable:
//! - In-memory backends for testing and embedded use
//! - Log-backed or database backends for production

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ids::{AccountId, MessageId};
use crate::key::ComputationKey;
use crate::message::{MessageRecord, MessageType};
use crate::period::DateWindow;
use crate::value::ComputedValue;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Message not found.
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// Message already acknowledged.
    #[error("Message already acknowledged: {0}")]
    AlreadyAcknowledged(MessageId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Durable record of computed statistic values.
///
/// The store is the system of record and may be shared by several engine
/// processes, so `save` must tolerate concurrent upserts of the same key.
pub trait ComputedValueStore: Send + Sync {
    /// Looks up a previously computed value.
    fn find(&self, key: &ComputationKey) -> Result<Option<ComputedValue>, StorageError>;

    /// Upserts a value (last write wins).
    fn save(&self, key: &ComputationKey, value: &ComputedValue) -> Result<(), StorageError>;

    /// Number of stored keys.
    fn len(&self) -> Result<usize, StorageError>;
}

/// Storage for fired alerts and recommendations.
///
/// Windows are matched against `MessageRecord::reference_date`.
pub trait MessageStore: Send + Sync {
    /// Returns true if any message of `message_type` exists for `account`
    /// within `window`.
    fn exists(
        &self,
        account: AccountId,
        message_type: MessageType,
        window: &DateWindow,
    ) -> Result<bool, StorageError> {
        Ok(self.count_in_window(account, message_type, window)? > 0)
    }

    /// Number of messages of `message_type` for `account` within `window`.
    fn count_in_window(
        &self,
        account: AccountId,
        message_type: MessageType,
        window: &DateWindow,
    ) -> Result<usize, StorageError>;

    /// Inserts a record. Returns `DuplicateKey` if the id already exists.
    fn save(&self, record: MessageRecord) -> Result<(), StorageError>;

    /// Atomically inserts `record` unless `max` messages of the same type
    /// already exist for the account within `window`.
    ///
    /// Returns `false` (and stores nothing) when the quota is reached.
    fn insert_within_quota(
        &self,
        record: MessageRecord,
        window: &DateWindow,
        max: usize,
    ) -> Result<bool, StorageError>;

    /// Get a message by ID.
    fn get(&self, id: MessageId) -> Result<Option<MessageRecord>, StorageError>;

    /// Sets `acknowledged_on` for a message owned by `account`.
    ///
    /// # Errors
    /// - `MessageNotFound`: unknown id, or owned by another account
    /// - `AlreadyAcknowledged`: acknowledged before
    fn acknowledge(
        &self,
        account: AccountId,
        id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<MessageRecord, StorageError>;

    /// All messages of an account, oldest first.
    fn find_by_account(&self, account: AccountId) -> Result<Vec<MessageRecord>, StorageError>;
}
