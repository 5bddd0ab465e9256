//! Batch resolution runtime.
//!
//! The `ResolutionEngine` is a synchronous executor for one account. A
//! monthly run covers every account of a utility, so this module provides a
//! small, bounded, thread-based pool that resolves many accounts
//! concurrently. Workers share one engine and therefore one dogpile cache.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDate;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::RuntimeConfig;
use crate::engine::{ResolutionEngine, ResolutionReport};
use crate::error::{ExecutionError, MeterError, MeterResult};
use crate::ids::{AccountId, SubjectId};
use crate::measurement::DeviceType;

const POOL_NAME: &str = "resolution";

/// One account to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionJob {
    pub account: AccountId,
    pub subject: SubjectId,
    pub reference_date: NaiveDate,
    pub devices: Vec<DeviceType>,
}

enum Job {
    Resolve {
        job: ResolutionJob,
        reply: Sender<ResolutionReport>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

fn disconnected() -> MeterError {
    MeterError::Execution(ExecutionError::Disconnected {
        pool: POOL_NAME.to_string(),
    })
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(workers: usize, queue_capacity: usize, engine: &Arc<ResolutionEngine>) -> MeterResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(engine);
            let handle = thread::Builder::new()
                .name(format!("meterstat-{POOL_NAME}-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Resolve { job, reply }) => {
                            let report =
                                engine.resolve_account(job.account, job.subject, job.reference_date, &job.devices);
                            let _ = reply.send(report);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| MeterError::internal(format!("failed to spawn resolution worker: {e}")))?;
            handles.push(handle);
        }

        tracing::info!(workers, queue_capacity, "started resolution workers");
        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> MeterResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(MeterError::Execution(ExecutionError::QueueFull {
                pool: POOL_NAME.to_string(),
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => Err(disconnected()),
        }
    }

    fn submit_blocking(&self, job: Job) -> MeterResult<()> {
        self.tx.send(job).map_err(|_| disconnected())
    }

    fn shutdown(self) {
        // Close the channel: workers drain queued jobs then exit.
        drop(self.tx);
        let workers = self.workers.len();
        for handle in self.workers {
            let _ = handle.join();
        }
        tracing::info!(workers, "stopped resolution workers");
    }
}

/// Handle returned by [`ResolutionRuntime::submit`].
#[derive(Debug)]
pub struct ResolutionHandle {
    account: AccountId,
    rx: Receiver<ResolutionReport>,
}

impl ResolutionHandle {
    #[must_use]
    pub const fn account(&self) -> AccountId {
        self.account
    }

    /// Waits for the report.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Disconnected` if the worker died first.
    pub fn join(self) -> MeterResult<ResolutionReport> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Waits for the report with a timeout.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Timeout` or `ExecutionError::Disconnected`.
    pub fn join_timeout(self, timeout: Duration) -> MeterResult<ResolutionReport> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => MeterError::Execution(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }
}

/// Worker pool running [`ResolutionEngine::resolve_account`] for many
/// accounts.
pub struct ResolutionRuntime {
    engine: Arc<ResolutionEngine>,
    pool: Option<WorkerPool>,
}

impl ResolutionRuntime {
    /// Starts `config.workers` threads sharing `engine`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a worker thread cannot be spawned.
    pub fn new(engine: ResolutionEngine, config: &RuntimeConfig) -> MeterResult<Self> {
        let engine = Arc::new(engine);
        let pool = WorkerPool::start(config.workers, config.queue_capacity, &engine)?;
        Ok(Self {
            engine,
            pool: Some(pool),
        })
    }

    fn pool(&self) -> MeterResult<&WorkerPool> {
        self.pool.as_ref().ok_or_else(disconnected)
    }

    /// Queues one account without blocking.
    ///
    /// # Errors
    ///
    /// - `ExecutionError::QueueFull` when the queue is at capacity
    /// - `ExecutionError::Disconnected` after shutdown
    pub fn submit(&self, job: ResolutionJob) -> MeterResult<ResolutionHandle> {
        let (tx, rx) = bounded(1);
        let account = job.account;
        self.pool()?.try_submit(Job::Resolve { job, reply: tx })?;
        Ok(ResolutionHandle { account, rx })
    }

    /// Resolves every job, waiting for queue space as needed. Reports are
    /// returned in job order.
    pub fn run_batch(&self, jobs: impl IntoIterator<Item = ResolutionJob>) -> Vec<MeterResult<ResolutionReport>> {
        let pending: Vec<MeterResult<ResolutionHandle>> = jobs
            .into_iter()
            .map(|job| -> MeterResult<ResolutionHandle> {
                let (tx, rx) = bounded(1);
                let account = job.account;
                self.pool()?.submit_blocking(Job::Resolve { job, reply: tx })?;
                Ok(ResolutionHandle { account, rx })
            })
            .collect();
        tracing::info!(jobs = pending.len(), "submitted resolution batch");
        pending
            .into_iter()
            .map(|handle| handle.and_then(ResolutionHandle::join))
            .collect()
    }

    #[must_use]
    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }

    /// Drains queued jobs and joins the workers.
    pub fn shutdown(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> MeterResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.pool()?.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for ResolutionRuntime {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}
