//! End-to-end tests for resolvers running inside the resolution engine.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{NaiveDate, Utc};

use meterstat::{
    AccountId, ComputationKey, DataField, DeviceType, DogpileCache, EngineConfig, ExecutionError, FiringResult,
    InMemoryComputedValueStore, InMemoryDataService, InMemoryMessageStore, MeasurementField, MessageStore,
    MessageType, MeterError, MeterResult, MonthlyChangeAlert, Outcome, Period, QueryAggregationService,
    ResolutionContext, ResolutionEngine, ResolutionJob, ResolutionRuntime, Resolver, ResolverDescriptor,
    ResolverRegistry, RuntimeConfig, Statistic, SubjectId,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

struct Fixture {
    data: Arc<InMemoryDataService>,
    messages: Arc<InMemoryMessageStore>,
    engine: ResolutionEngine,
}

impl Fixture {
    fn new(registry: ResolverRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    fn with_config(registry: ResolverRegistry, config: EngineConfig) -> Self {
        let data = Arc::new(InMemoryDataService::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        let cache = Arc::new(DogpileCache::new(
            Arc::new(InMemoryComputedValueStore::new()),
            Arc::new(QueryAggregationService::new(Arc::clone(&data))),
        ));
        let engine = ResolutionEngine::new(
            registry,
            cache,
            data.clone(),
            messages.clone(),
            config,
        );
        Self { data, messages, engine }
    }

    fn standard() -> Self {
        Self::new(ResolverRegistry::standard())
    }

    fn account(&self, subject: SubjectId) -> AccountId {
        let account = AccountId::new();
        self.data.enroll(account, subject);
        account
    }

    fn meter(&self, account: AccountId, date: NaiveDate, volume: f64) {
        self.data.record(account, DeviceType::Meter, date, &[(DataField::Volume, volume)]);
    }

    fn shower(&self, account: AccountId, date: NaiveDate, duration: f64, volume: f64) {
        self.data.record(
            account,
            DeviceType::Amphiro,
            date,
            &[(DataField::Duration, duration), (DataField::Volume, volume)],
        );
    }

    /// One account with `previous` in January and `current` in February, and
    /// a neighbour chosen so the February population average is `average`.
    fn monthly_change(&self, current: f64, previous: f64, average: f64) -> (AccountId, SubjectId) {
        let subject = SubjectId::new();
        let account = self.account(subject);
        self.meter(account, d(2024, 1, 15), previous);
        self.meter(account, d(2024, 2, 15), current);
        let neighbour = self.account(subject);
        self.meter(neighbour, d(2024, 2, 15), 2.0 * average - current);
        (account, subject)
    }
}

fn march_first() -> NaiveDate {
    d(2024, 3, 1)
}

#[test]
fn decrease_below_both_thresholds_does_not_fire() {
    let fx = Fixture::standard();
    let (account, subject) = fx.monthly_change(80.0, 100.0, 150.0);

    let report = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]);
    assert_eq!(report.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::NotFired));
    assert!(report.persisted().is_empty());
}

#[test]
fn large_increase_fires_regardless_of_average() {
    let fx = Fixture::standard();
    let (account, subject) = fx.monthly_change(140.0, 100.0, 150.0);

    let report = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]);
    let ids = report.persisted();
    assert_eq!(ids.len(), 1);

    let record = fx.messages.get(ids[0]).unwrap().unwrap();
    assert_eq!(record.message_type, MessageType::MonthlyConsumptionChange);
    assert_eq!(record.reference_date, march_first());
    let keys: Vec<&str> = record.parameters.iter().map(|(k, _)| k).take(2).collect();
    assert_eq!(keys, vec!["reference_date", "device_type"]);
    assert_eq!(record.parameters.get_f64("percent_change"), Some(40.0));
    assert_eq!(record.parameters.get_f64("average_value"), Some(150.0));
    assert_eq!(record.parameters.get_f64("previous_value"), Some(100.0));
}

#[test]
fn moderate_increase_fires_only_below_average() {
    let fx = Fixture::standard();
    let (below, subject) = fx.monthly_change(115.0, 100.0, 150.0);
    let report = fx.engine.resolve_account(below, subject, march_first(), &[DeviceType::Meter]);
    assert_eq!(report.persisted().len(), 1);

    let (above, subject) = fx.monthly_change(115.0, 100.0, 110.0);
    let report = fx.engine.resolve_account(above, subject, march_first(), &[DeviceType::Meter]);
    assert_eq!(report.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::NotFired));
}

#[test]
fn zero_previous_consumption_never_fires() {
    let fx = Fixture::standard();
    let (account, subject) = fx.monthly_change(140.0, 0.0, 150.0);

    let report = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]);
    assert_eq!(report.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::NotFired));
    assert!(report.failures().is_empty());
}

#[test]
fn missing_history_is_not_an_error() {
    let fx = Fixture::standard();
    let subject = SubjectId::new();
    let account = fx.account(subject);
    fx.meter(account, d(2024, 2, 15), 100.0);

    let report = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]);
    assert_eq!(report.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::NotFired));
}

#[test]
fn resolving_twice_fires_once() {
    let fx = Fixture::standard();
    let (account, subject) = fx.monthly_change(140.0, 100.0, 150.0);

    let first = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]);
    assert_eq!(first.persisted().len(), 1);

    let later = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]);
    assert_eq!(later.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::QuotaReached));
    assert_eq!(fx.messages.len().unwrap(), 1);
}

#[test]
fn concurrent_passes_fire_once() {
    let fx = Arc::new(Fixture::standard());
    let (account, subject) = fx.monthly_change(140.0, 100.0, 150.0);

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let fx = Arc::clone(&fx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter])
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let persisted: usize = reports.iter().map(|r| r.persisted().len()).sum();
    assert_eq!(persisted, 1);
    assert!(reports.iter().all(|r| r.failures().is_empty()));
    assert_eq!(fx.messages.len().unwrap(), 1);
}

#[test]
fn resolvers_run_only_on_their_day() {
    let fx = Fixture::standard();
    let (account, subject) = fx.monthly_change(140.0, 100.0, 150.0);

    let report = fx.engine.resolve_account(
        account,
        subject,
        d(2024, 3, 2),
        &[DeviceType::Meter, DeviceType::Amphiro],
    );
    assert_eq!(report.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::NotDue));
    assert_ne!(report.outcome(MessageType::LessShowerTime), Some(&Outcome::NotDue));

    let report = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Amphiro]);
    assert_eq!(report.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::Unsupported));
    assert_eq!(report.outcome(MessageType::LessShowerTime), Some(&Outcome::NotDue));
}

#[test]
fn long_and_heavy_showers_fire() {
    let fx = Fixture::standard();
    let subject = SubjectId::new();
    let user = fx.account(subject);
    for month in 1..=3 {
        fx.shower(user, d(2024, month, 10), 600.0, 90.0);
    }
    let other = fx.account(subject);
    fx.shower(other, d(2024, 3, 10), 100.0, 30.0);

    let report = fx.engine.resolve_account(user, subject, d(2024, 4, 2), &[DeviceType::Amphiro]);
    let ids = report.persisted();
    assert_eq!(ids.len(), 1, "{report:?}");

    let params = fx.messages.get(ids[0]).unwrap().unwrap().parameters;
    assert_eq!(params.get_f64("user_average_consumption"), Some(90.0));
    assert_eq!(params.get_f64("user_average_duration"), Some(600.0));
    assert_eq!(params.get_f64("average_duration"), Some(350.0));
    assert_eq!(params.get_f64("average_consumption"), Some(60.0));
    assert_eq!(params.get_f64("annual_savings_1"), Some(108.0));
    assert_eq!(params.get_f64("annual_savings_2"), Some(216.0));
}

#[test]
fn zero_population_shower_averages_never_fire() {
    let fx = Fixture::standard();
    let subject = SubjectId::new();
    let user = fx.account(subject);
    fx.shower(user, d(2023, 12, 10), 600.0, 90.0);
    fx.shower(user, d(2024, 1, 10), 600.0, 90.0);
    fx.shower(user, d(2024, 2, 10), 0.0, 0.0);
    let other = fx.account(subject);
    fx.shower(other, d(2024, 2, 12), 0.0, 0.0);

    let report = fx.engine.resolve_account(user, subject, d(2024, 3, 2), &[DeviceType::Amphiro]);
    assert_eq!(report.outcome(MessageType::LessShowerTime), Some(&Outcome::NotFired));
    assert!(report.failures().is_empty());
    assert!(report.persisted().is_empty());
    assert!(fx.messages.find_by_account(user).unwrap().is_empty());
}

#[test]
fn configured_statistics_period_selects_the_population_key() {
    let config = EngineConfig {
        statistics_period: Period::years(1),
        ..EngineConfig::default()
    };
    let fx = Fixture::with_config(ResolverRegistry::standard(), config);
    let (account, subject) = fx.monthly_change(140.0, 100.0, 150.0);

    let report = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]);
    assert!(report.failures().is_empty());

    let average = |period| {
        ComputationKey::new(
            subject,
            march_first(),
            period,
            MeasurementField::new(DeviceType::Meter, DataField::Volume),
            Statistic::Average,
        )
    };
    assert!(fx.engine.cache().contains(&average(Period::years(1))));
    assert!(!fx.engine.cache().contains(&average(Period::months(1))));
    // Nothing was recorded in 2023, so there is no yearly average to compare against.
    assert_eq!(report.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::NotFired));
}

#[test]
fn unenrolled_subject_has_no_statistics() {
    let fx = Fixture::standard();
    let account = AccountId::new();
    fx.meter(account, d(2024, 1, 15), 100.0);
    fx.meter(account, d(2024, 2, 15), 140.0);

    let report = fx.engine.resolve_account(account, SubjectId::new(), march_first(), &[DeviceType::Meter]);
    assert!(report.failures().is_empty(), "{report:?}");
    assert_eq!(report.outcome(MessageType::MonthlyConsumptionChange), Some(&Outcome::NotFired));
}

#[test]
fn long_but_light_showers_do_not_fire() {
    let fx = Fixture::standard();
    let subject = SubjectId::new();
    let user = fx.account(subject);
    for month in 1..=3 {
        fx.shower(user, d(2024, month, 10), 600.0, 20.0);
    }
    let other = fx.account(subject);
    fx.shower(other, d(2024, 3, 10), 100.0, 100.0);

    let report = fx.engine.resolve_account(user, subject, d(2024, 4, 2), &[DeviceType::Amphiro]);
    assert_eq!(report.outcome(MessageType::LessShowerTime), Some(&Outcome::NotFired));
}

struct Panicking(ResolverDescriptor);

impl Resolver for Panicking {
    fn message_type(&self) -> MessageType {
        MessageType::LessShowerTime
    }

    fn descriptor(&self) -> &ResolverDescriptor {
        &self.0
    }

    fn resolve(
        &self,
        _ctx: &ResolutionContext<'_>,
        _account: AccountId,
        _device: DeviceType,
    ) -> MeterResult<Vec<FiringResult>> {
        panic!("resolver bug");
    }
}

struct Failing(ResolverDescriptor);

impl Resolver for Failing {
    fn message_type(&self) -> MessageType {
        MessageType::LessShowerTime
    }

    fn descriptor(&self) -> &ResolverDescriptor {
        &self.0
    }

    fn resolve(
        &self,
        _ctx: &ResolutionContext<'_>,
        _account: AccountId,
        _device: DeviceType,
    ) -> MeterResult<Vec<FiringResult>> {
        Err(MeterError::internal("data service unavailable"))
    }
}

#[test]
fn failing_resolvers_do_not_stop_others() {
    for broken in [
        Arc::new(Panicking(ResolverDescriptor::monthly(1, [DeviceType::Meter]))) as Arc<dyn Resolver>,
        Arc::new(Failing(ResolverDescriptor::monthly(1, [DeviceType::Meter]))),
    ] {
        let registry = ResolverRegistry::new()
            .with(Arc::new(MonthlyChangeAlert::default()))
            .unwrap()
            .with(broken)
            .unwrap();
        let fx = Fixture::new(registry);
        let (account, subject) = fx.monthly_change(140.0, 100.0, 150.0);

        let report = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]);
        assert_eq!(report.persisted().len(), 1);
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, MessageType::LessShowerTime);
        assert!(failures[0].1.contains("failed"), "{}", failures[0].1);
    }
}

#[test]
fn acknowledgement_happens_once() {
    let fx = Fixture::standard();
    let (account, subject) = fx.monthly_change(140.0, 100.0, 150.0);
    let id = fx.engine.resolve_account(account, subject, march_first(), &[DeviceType::Meter]).persisted()[0];

    assert_eq!(fx.engine.pending_messages(account).unwrap().len(), 1);

    let err = fx.engine.acknowledge(AccountId::new(), id, Utc::now()).unwrap_err();
    assert!(matches!(err, MeterError::Execution(ExecutionError::MessageNotFound { .. })));

    let acked = fx.engine.acknowledge(account, id, Utc::now()).unwrap();
    assert!(acked.acknowledged_on.is_some());

    let err = fx.engine.acknowledge(account, id, Utc::now()).unwrap_err();
    assert!(matches!(err, MeterError::Execution(ExecutionError::AlreadyAcknowledged { .. })));
    assert!(fx.engine.pending_messages(account).unwrap().is_empty());
}

#[test]
fn batch_runtime_shares_the_cache() {
    let fx = Fixture::standard();
    let subject = SubjectId::new();
    let mut jobs = Vec::new();
    for i in 0..20 {
        let account = fx.account(subject);
        fx.meter(account, d(2024, 1, 15), 100.0);
        fx.meter(account, d(2024, 2, 15), if i % 2 == 0 { 140.0 } else { 90.0 });
        jobs.push(ResolutionJob {
            account,
            subject,
            reference_date: march_first(),
            devices: vec![DeviceType::Meter],
        });
    }

    let engine = fx.engine.clone();
    let runtime = ResolutionRuntime::new(engine, &RuntimeConfig { workers: 4, queue_capacity: 4 }).unwrap();
    let reports: Vec<_> = runtime.run_batch(jobs).into_iter().map(Result::unwrap).collect();
    runtime.shutdown();

    let persisted: usize = reports.iter().map(|r| r.persisted().len()).sum();
    assert_eq!(persisted, 10);
    // One population average shared by every account.
    assert_eq!(fx.engine.cache().stats().computations, 1);
}
