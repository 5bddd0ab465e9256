//! Resolution engine.
//!
//! The engine runs every registered resolver for one account and one
//! reference date. It owns the parts resolvers must not: cadence gating,
//! per-period quotas and persistence of fired messages. Failures are
//! isolated per resolver and reported, never propagated.

/// Batch worker pool running resolution passes concurrently.
pub mod runtime;

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::cache::DogpileCache;
use crate::config::EngineConfig;
use crate::error::{ExecutionError, MeterError, MeterResult};
use crate::ids::{AccountId, MessageId, SubjectId};
use crate::measurement::DeviceType;
use crate::message::{MessageRecord, MessageType};
use crate::query::DataService;
use crate::resolver::{FiringResult, ResolutionContext, Resolver, ResolverRegistry};
use crate::statistics::ConsumptionStatistics;
use crate::storage::{MessageStore, StorageError};

/// What happened to one resolver during a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The reference date is not the resolver's day of the period.
    NotDue,
    /// None of the account's devices is supported by the resolver.
    Unsupported,
    /// The account already received the maximum number of messages this period.
    QuotaReached,
    /// The resolver ran and nothing fired.
    NotFired,
    /// Fired messages that were stored.
    Persisted { ids: Vec<MessageId> },
    /// Fired messages dropped because a concurrent pass filled the quota first.
    Suppressed { duplicates: usize },
    /// The resolver or the message store failed.
    Failed { reason: String },
}

/// Result of resolving one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionReport {
    pub account: AccountId,
    pub reference_date: NaiveDate,
    /// Outcomes in registry order. A resolver that both persisted and
    /// suppressed messages appears twice.
    pub outcomes: Vec<(MessageType, Outcome)>,
}

impl ResolutionReport {
    /// Ids of every stored message.
    #[must_use]
    pub fn persisted(&self) -> Vec<MessageId> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                Outcome::Persisted { ids } => Some(ids.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Failed resolvers and their reasons.
    #[must_use]
    pub fn failures(&self) -> Vec<(MessageType, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(t, o)| match o {
                Outcome::Failed { reason } => Some((*t, reason.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Number of fired messages suppressed as duplicates.
    #[must_use]
    pub fn suppressed(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                Outcome::Suppressed { duplicates } => *duplicates,
                _ => 0,
            })
            .sum()
    }

    /// First outcome recorded for `message_type`.
    #[must_use]
    pub fn outcome(&self, message_type: MessageType) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(t, _)| *t == message_type)
            .map(|(_, o)| o)
    }
}

/// Runs resolvers and persists the messages they fire.
#[derive(Clone)]
pub struct ResolutionEngine {
    registry: Arc<ResolverRegistry>,
    cache: Arc<DogpileCache>,
    data: Arc<dyn DataService>,
    messages: Arc<dyn MessageStore>,
    config: EngineConfig,
}

impl ResolutionEngine {
    #[must_use]
    pub fn new(
        registry: ResolverRegistry,
        cache: Arc<DogpileCache>,
        data: Arc<dyn DataService>,
        messages: Arc<dyn MessageStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            cache,
            data,
            messages,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<DogpileCache> {
        &self.cache
    }

    /// Runs every registered resolver for `account`.
    ///
    /// `subject` selects the population statistics; `devices` are the
    /// devices the account owns.
    pub fn resolve_account(
        &self,
        account: AccountId,
        subject: SubjectId,
        reference_date: NaiveDate,
        devices: &[DeviceType],
    ) -> ResolutionReport {
        let ctx = ResolutionContext {
            reference_date,
            statistics: ConsumptionStatistics::new(
                Arc::clone(&self.cache),
                subject,
                reference_date,
                self.config.statistics_period,
            ),
            data: self.data.as_ref(),
        };
        let owned: BTreeSet<DeviceType> = devices.iter().copied().collect();

        let mut outcomes = Vec::with_capacity(self.registry.len());
        for (message_type, resolver) in self.registry.iter() {
            for outcome in self.resolve_one(&ctx, account, &owned, resolver.as_ref()) {
                outcomes.push((message_type, outcome));
            }
        }

        let report = ResolutionReport {
            account,
            reference_date,
            outcomes,
        };
        tracing::debug!(
            account = %account,
            reference_date = %reference_date,
            persisted = report.persisted().len(),
            suppressed = report.suppressed(),
            failed = report.failures().len(),
            "resolved account"
        );
        report
    }

    fn resolve_one(
        &self,
        ctx: &ResolutionContext<'_>,
        account: AccountId,
        owned: &BTreeSet<DeviceType>,
        resolver: &dyn Resolver,
    ) -> Vec<Outcome> {
        let message_type = resolver.message_type();
        let descriptor = resolver.descriptor();

        if !descriptor.is_due(ctx.reference_date) {
            return vec![Outcome::NotDue];
        }

        let devices: Vec<DeviceType> = owned
            .intersection(resolver.supported_devices())
            .copied()
            .collect();
        if devices.is_empty() {
            return vec![Outcome::Unsupported];
        }

        let window = match descriptor.window(ctx.reference_date) {
            Ok(w) => w,
            Err(e) => return vec![Self::failed(message_type, account, e.to_string())],
        };
        let max = descriptor.max_per_period as usize;
        match self.messages.count_in_window(account, message_type, &window) {
            Ok(n) if n >= max => return vec![Outcome::QuotaReached],
            Ok(_) => {}
            Err(e) => return vec![Self::failed(message_type, account, e.to_string())],
        }

        let mut fired = Vec::new();
        for device in devices {
            match self.invoke(resolver, ctx, account, device) {
                Ok(results) => fired.extend(results.into_iter().filter(|r| r.fired)),
                Err(reason) => return vec![Self::failed(message_type, account, reason)],
            }
        }
        if fired.is_empty() {
            return vec![Outcome::NotFired];
        }

        let mut ids = Vec::new();
        let mut duplicates = 0;
        let mut failure = None;
        for result in fired {
            let record = MessageRecord::new(account, message_type, ctx.reference_date, result.parameters);
            let id = record.id;
            match self.messages.insert_within_quota(record, &window, max) {
                Ok(true) => ids.push(id),
                Ok(false) => {
                    tracing::debug!(
                        account = %account,
                        message_type = %message_type,
                        window = %window,
                        "suppressed duplicate firing"
                    );
                    duplicates += 1;
                }
                Err(e) => {
                    failure = Some(Self::failed(message_type, account, e.to_string()));
                    break;
                }
            }
        }

        let mut outcomes = Vec::new();
        if !ids.is_empty() {
            outcomes.push(Outcome::Persisted { ids });
        }
        if duplicates > 0 {
            outcomes.push(Outcome::Suppressed { duplicates });
        }
        outcomes.extend(failure);
        outcomes
    }

    fn invoke(
        &self,
        resolver: &dyn Resolver,
        ctx: &ResolutionContext<'_>,
        account: AccountId,
        device: DeviceType,
    ) -> Result<Vec<FiringResult>, String> {
        if !self.config.catch_panics {
            return resolver.resolve(ctx, account, device).map_err(|e| e.to_string());
        }
        match panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(ctx, account, device))) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(format!("panicked: {message}"))
            }
        }
    }

    fn failed(message_type: MessageType, account: AccountId, reason: String) -> Outcome {
        let err = ExecutionError::ResolverFailed { message_type, reason };
        tracing::error!(account = %account, error = %err, "resolver failed");
        Outcome::Failed {
            reason: err.to_string(),
        }
    }

    /// Marks a message of `account` as acknowledged.
    ///
    /// # Errors
    ///
    /// - `ExecutionError::MessageNotFound` for an unknown id or another
    ///   account's message
    /// - `ExecutionError::AlreadyAcknowledged` on a repeated call
    pub fn acknowledge(&self, account: AccountId, id: MessageId, at: DateTime<Utc>) -> MeterResult<MessageRecord> {
        self.messages.acknowledge(account, id, at).map_err(|e| match e {
            StorageError::MessageNotFound(id) => ExecutionError::MessageNotFound { id }.into(),
            StorageError::AlreadyAcknowledged(id) => ExecutionError::AlreadyAcknowledged { id }.into(),
            other => MeterError::from(other),
        })
    }

    /// Newest unacknowledged message of each type for `account`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates message store failures.
    pub fn pending_messages(&self, account: AccountId) -> MeterResult<Vec<MessageRecord>> {
        let mut pending: Vec<MessageRecord> = self
            .messages
            .find_by_account(account)?
            .into_iter()
            .filter(|m| !m.is_acknowledged())
            .collect();
        pending.sort_by(|a, b| {
            b.reference_date
                .cmp(&a.reference_date)
                .then(b.created_on.cmp(&a.created_on))
        });

        let mut seen = BTreeSet::new();
        pending.retain(|m| seen.insert(m.message_type));
        Ok(pending)
    }
}

impl std::fmt::Debug for ResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionEngine")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
