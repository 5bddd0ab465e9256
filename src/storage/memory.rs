//! In-memory storage backends.
//!
//! This module provides thread-safe in-memory implementations of the storage
//! traits and of the time-series [`DataService`]. They are intended for
//! embedded usage, tests, and as reference implementations.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};

use crate::ids::{AccountId, MessageId, SubjectId};
use crate::key::ComputationKey;
use crate::measurement::{DataField, DeviceType};
use crate::message::{MessageRecord, MessageType};
use crate::period::DateWindow;
use crate::query::{DataQuery, DataService, Population, QueryError, QueryResponse, SeriesFacade};
use crate::storage::traits::{ComputedValueStore, MessageStore, StorageError};
use crate::value::ComputedValue;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory computed-value store.
#[derive(Debug, Default)]
pub struct InMemoryComputedValueStore {
    values: RwLock<HashMap<ComputationKey, ComputedValue>>,
    saves: AtomicU64,
}

impl InMemoryComputedValueStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls served so far.
    #[must_use]
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

impl ComputedValueStore for InMemoryComputedValueStore {
    fn find(&self, key: &ComputationKey) -> Result<Option<ComputedValue>, StorageError> {
        let values = self.values.read().map_err(|_| lock_err("value.find"))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &ComputationKey, value: &ComputedValue) -> Result<(), StorageError> {
        let mut values = self.values.write().map_err(|_| lock_err("value.save"))?;
        values.insert(*key, value.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let values = self.values.read().map_err(|_| lock_err("value.len"))?;
        Ok(values.len())
    }
}

#[derive(Debug, Default)]
struct MessageState {
    records: Vec<MessageRecord>,
    by_id: HashMap<MessageId, usize>,
}

impl MessageState {
    fn count(&self, account: AccountId, message_type: MessageType, window: &DateWindow) -> usize {
        self.records
            .iter()
            .filter(|r| {
                r.account == account
                    && r.message_type == message_type
                    && window.contains(r.reference_date)
            })
            .count()
    }

    fn push(&mut self, record: MessageRecord) -> Result<(), StorageError> {
        if self.by_id.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey(record.id.to_string()));
        }
        self.by_id.insert(record.id, self.records.len());
        self.records.push(record);
        Ok(())
    }
}

/// Thread-safe in-memory message store.
///
/// A single lock guards all records, which makes `insert_within_quota` a
/// plain check-and-insert under the write lock.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    state: RwLock<MessageState>,
}

impl InMemoryMessageStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages.
    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("message.len"))?;
        Ok(state.records.len())
    }
}

impl MessageStore for InMemoryMessageStore {
    fn count_in_window(
        &self,
        account: AccountId,
        message_type: MessageType,
        window: &DateWindow,
    ) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("message.count"))?;
        Ok(state.count(account, message_type, window))
    }

    fn save(&self, record: MessageRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("message.save"))?;
        state.push(record)
    }

    fn insert_within_quota(
        &self,
        record: MessageRecord,
        window: &DateWindow,
        max: usize,
    ) -> Result<bool, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("message.insert_within_quota"))?;
        if state.count(record.account, record.message_type, window) >= max {
            return Ok(false);
        }
        state.push(record)?;
        Ok(true)
    }

    fn get(&self, id: MessageId) -> Result<Option<MessageRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("message.get"))?;
        Ok(state.by_id.get(&id).map(|&idx| state.records[idx].clone()))
    }

    fn acknowledge(
        &self,
        account: AccountId,
        id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<MessageRecord, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("message.acknowledge"))?;
        let idx = *state.by_id.get(&id).ok_or(StorageError::MessageNotFound(id))?;
        let record = &mut state.records[idx];
        if record.account != account {
            return Err(StorageError::MessageNotFound(id));
        }
        record
            .acknowledge(at)
            .map_err(|_| StorageError::AlreadyAcknowledged(id))?;
        Ok(record.clone())
    }

    fn find_by_account(&self, account: AccountId) -> Result<Vec<MessageRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("message.find_by_account"))?;
        Ok(state
            .records
            .iter()
            .filter(|r| r.account == account)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
struct Reading {
    date: NaiveDate,
    values: Vec<(DataField, f64)>,
}

#[derive(Debug, Default)]
struct DataState {
    members: HashMap<SubjectId, BTreeSet<AccountId>>,
    readings: HashMap<(AccountId, DeviceType), Vec<Reading>>,
}

/// In-memory time-series store answering [`DataQuery`]s.
///
/// Readings are dated samples of one or more fields (a meter reading, a
/// shower session). Accounts are enrolled with subjects to form populations.
#[derive(Debug, Default)]
pub struct InMemoryDataService {
    state: RwLock<DataState>,
}

impl InMemoryDataService {
    /// Create a new empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `account` to the population of `subject`.
    pub fn enroll(&self, account: AccountId, subject: SubjectId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.members.entry(subject).or_default().insert(account);
    }

    /// Records one sample.
    pub fn record(&self, account: AccountId, device: DeviceType, date: NaiveDate, values: &[(DataField, f64)]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.readings.entry((account, device)).or_default().push(Reading {
            date,
            values: values.to_vec(),
        });
    }

    fn reduce_account(state: &DataState, account: AccountId, query: &DataQuery) -> Option<SeriesFacade> {
        let readings = state.readings.get(&(account, query.device))?;
        let mut by_field: HashMap<DataField, Vec<f64>> = HashMap::new();
        for reading in readings.iter().filter(|r| query.window.contains(r.date)) {
            for &(field, value) in &reading.values {
                by_field.entry(field).or_default().push(value);
            }
        }
        if by_field.is_empty() {
            return None;
        }

        let mut facade = SeriesFacade::new(account, query.device);
        for (field, values) in &by_field {
            for metric in &query.metrics {
                if let Some(v) = metric.reduce(values) {
                    facade.set(*field, *metric, v);
                }
            }
        }
        Some(facade)
    }
}

impl DataService for InMemoryDataService {
    fn execute(&self, query: &DataQuery) -> Result<QueryResponse, QueryError> {
        let state = self
            .state
            .read()
            .map_err(|_| QueryError::Backend("poisoned lock: data.execute".to_string()))?;

        let accounts: Vec<AccountId> = match query.population {
            Population::Account(account) => vec![account],
            // A subject nobody is enrolled in has no data, like one without readings.
            Population::Subject(subject) => state
                .members
                .get(&subject)
                .map(|members| members.iter().copied().collect())
                .unwrap_or_default(),
        };

        let series = accounts
            .into_iter()
            .filter_map(|account| Self::reduce_account(&state, account, query))
            .collect();
        Ok(QueryResponse { series })
    }
}
