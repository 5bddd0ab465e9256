use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::NaiveDate;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use meterstat::{
    AccountId, ComputationKey, DataField, DeviceType, DogpileCache, InMemoryComputedValueStore, InMemoryDataService,
    MeasurementField, Period, QueryAggregationService, Statistic, SubjectId,
};

fn make_cache() -> (DogpileCache, SubjectId) {
    let data = Arc::new(InMemoryDataService::new());
    let subject = SubjectId::new();

    // Seed a population so misses measure realistic aggregation work.
    // 256 accounts with one meter reading per day of February.
    for i in 0..256u32 {
        let account = AccountId::new();
        data.enroll(account, subject);
        for day in 1..=29 {
            let date = NaiveDate::from_ymd_opt(2024, 2, day).unwrap();
            data.record(account, DeviceType::Meter, date, &[(DataField::Volume, 3.0 + f64::from(i % 7))]);
        }
    }

    let cache = DogpileCache::new(
        Arc::new(InMemoryComputedValueStore::new()),
        Arc::new(QueryAggregationService::new(data)),
    );
    (cache, subject)
}

fn key(subject: SubjectId, statistic: Statistic) -> ComputationKey {
    ComputationKey::new(
        subject,
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        Period::months(1),
        MeasurementField::new(DeviceType::Meter, DataField::Volume),
        statistic,
    )
}

fn bench_memory_hit(c: &mut Criterion) {
    let (cache, subject) = make_cache();
    let key = key(subject, Statistic::Average);
    cache.get(&key).unwrap();

    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));
    group.bench_function("memory_hit", |b| {
        b.iter(|| cache.get(&key).unwrap());
    });
    group.finish();
}

fn bench_miss(c: &mut Criterion) {
    c.bench_function("cache/miss_compute_and_save", |b| {
        b.iter_custom(|iters| {
            // Fresh cache per sample so every get is a miss.
            let (cache, subject) = make_cache();
            let keys: Vec<ComputationKey> = (1..=iters)
                .map(|i| {
                    let p = u8::try_from(i % 100 + 1).unwrap();
                    ComputationKey::new(
                        subject,
                        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Days::new(i / 100 * 31),
                        Period::months(1),
                        MeasurementField::new(DeviceType::Meter, DataField::Volume),
                        Statistic::percentile(p).unwrap(),
                    )
                })
                .collect();

            let start = Instant::now();
            for key in &keys {
                let _ = cache.get(key).unwrap();
            }
            start.elapsed()
        });
    });
}

fn bench_contended_hits(c: &mut Criterion) {
    let (cache, subject) = make_cache();
    let cache = Arc::new(cache);
    let key = key(subject, Statistic::Sum);
    cache.get(&key).unwrap();

    c.bench_function("cache/contended_memory_hit_x8", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = Arc::clone(&cache);
                    thread::spawn(move || {
                        for _ in 0..iters {
                            let _ = cache.get(&key).unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            start.elapsed()
        });
    });
}

criterion_group!(benches, bench_memory_hit, bench_miss, bench_contended_hits);
criterion_main!(benches);
