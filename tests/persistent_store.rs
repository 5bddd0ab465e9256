//! Crash recovery tests for the log-backed computed-value store.
//!
//! These tests verify that the store correctly handles:
//! - Partial writes (simulated crash mid-write)
//! - Replay after reopen
//! - CRC corruption detection
//! - Use as the durable layer of a dogpile cache

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::tempdir;

use meterstat::storage::persistent::{open_value_store, LogComputedValueStore, PersistentConfig};
use meterstat::{
    AggregationError, AggregationService, ComputationKey, ComputedValue, ComputedValueStore, DataField, DeviceType,
    DogpileCache, MeasurementField, Period, Statistic, SubjectId,
};

fn key(subject: SubjectId, day: u32) -> ComputationKey {
    ComputationKey::new(
        subject,
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
        Period::days(1),
        MeasurementField::new(DeviceType::Meter, DataField::Volume),
        Statistic::Average,
    )
}

fn fast() -> Option<PersistentConfig> {
    Some(PersistentConfig { sync_on_write: false })
}

/// Partial trailing records are dropped and the rest is recovered.
#[test]
fn test_partial_record_recovery() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("values.log");
    let subject = SubjectId::new();

    {
        let store = open_value_store(&path, fast()).unwrap();
        for day in 1..=5 {
            store.save(&key(subject, day), &ComputedValue::of(f64::from(day))).unwrap();
        }
    }

    // Truncate ~20% off the end (simulating a crash mid-write).
    {
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        let size = file.metadata().unwrap().len();
        file.set_len(size * 4 / 5).unwrap();
    }

    let store = open_value_store(&path, fast()).unwrap();
    let count = store.len().unwrap();
    assert!((1..=4).contains(&count), "recovered count should be between 1 and 4, got {count}");
    assert_eq!(store.find(&key(subject, 1)).unwrap().unwrap().value, Some(1.0));

    // Appends after recovery stay readable.
    store.save(&key(subject, 9), &ComputedValue::of(9.0)).unwrap();
    drop(store);
    let store = open_value_store(&path, fast()).unwrap();
    assert_eq!(store.len().unwrap(), count + 1);
    assert_eq!(store.find(&key(subject, 9)).unwrap().unwrap().value, Some(9.0));
}

/// A flipped byte stops replay at the damaged record.
#[test]
fn test_crc_corruption_detected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("values.log");
    let subject = SubjectId::new();

    {
        let store = open_value_store(&path, fast()).unwrap();
        store.save(&key(subject, 1), &ComputedValue::of(1.0)).unwrap();
        store.save(&key(subject, 2), &ComputedValue::of(2.0)).unwrap();
    }

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 10;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let store = open_value_store(&path, fast()).unwrap();
    assert_eq!(store.len().unwrap(), 1);
    assert!(store.find(&key(subject, 2)).unwrap().is_none());
    assert!(store.size_bytes().unwrap() < bytes.len() as u64);
}

/// Replaying twice yields the same state.
#[test]
fn test_replay_idempotency() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("values.log");
    let subject = SubjectId::new();

    {
        let store = open_value_store(&path, fast()).unwrap();
        for day in 1..=3 {
            store
                .save(&key(subject, day), &ComputedValue::of(f64::from(day)).with_provenance("test"))
                .unwrap();
        }
    }

    let first = open_value_store(&path, fast()).unwrap();
    let a: Vec<Option<ComputedValue>> = (1..=3).map(|d| first.find(&key(subject, d)).unwrap()).collect();
    drop(first);
    let second = open_value_store(&path, fast()).unwrap();
    let b: Vec<Option<ComputedValue>> = (1..=3).map(|d| second.find(&key(subject, d)).unwrap()).collect();
    assert_eq!(a, b);
    assert_eq!(b[2].as_ref().unwrap().provenance.as_deref(), Some("test"));
}

/// A file that is not a computed-value log is refused.
#[test]
fn test_foreign_file_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("values.log");
    fs::write(&path, b"definitely not a log").unwrap();

    let err = open_value_store(&path, None).unwrap_err();
    assert!(err.is_execution());
}

/// A file too short to hold a header is refused and left untouched.
#[test]
fn test_truncated_header_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("values.log");
    fs::write(&path, b"abc").unwrap();

    let err = open_value_store(&path, None).unwrap_err();
    assert!(err.is_execution());
    assert_eq!(fs::read(&path).unwrap(), b"abc");
}

/// An empty file is initialized as a new log.
#[test]
fn test_empty_file_initialized() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("values.log");
    fs::write(&path, b"").unwrap();

    let store = open_value_store(&path, fast()).unwrap();
    assert_eq!(store.len().unwrap(), 0);
    store.save(&key(SubjectId::new(), 1), &ComputedValue::of(1.0)).unwrap();
    assert_eq!(store.len().unwrap(), 1);
}

struct Counting(AtomicUsize);

impl AggregationService for Counting {
    fn compute(&self, _key: &ComputationKey) -> Result<ComputedValue, AggregationError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(ComputedValue::of(120.0))
    }
}

/// A restarted process finds values computed before the restart.
#[test]
fn test_cache_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("values.log");
    let subject = SubjectId::new();
    let config = PersistentConfig { sync_on_write: true };

    let first = Arc::new(Counting(AtomicUsize::new(0)));
    {
        let store = Arc::new(LogComputedValueStore::open(&path, &config).unwrap());
        let cache = DogpileCache::new(store, first.clone());
        assert_eq!(cache.get(&key(subject, 1)).unwrap().value, Some(120.0));
    }
    assert_eq!(first.0.load(Ordering::SeqCst), 1);

    let second = Arc::new(Counting(AtomicUsize::new(0)));
    let store = Arc::new(LogComputedValueStore::open(&path, &config).unwrap());
    let cache = DogpileCache::new(store, second.clone());
    assert_eq!(cache.get(&key(subject, 1)).unwrap().value, Some(120.0));
    assert_eq!(second.0.load(Ordering::SeqCst), 0);
    assert_eq!(cache.stats().store_hits, 1);
}
