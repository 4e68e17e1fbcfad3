//! Common test utilities and fixtures.

#![allow(dead_code)]

use bucketry_lib::bucket::{AddressingMode, BucketKey, Calendar, Granularity};
use bucketry_lib::buffer::{BufferConfig, OperationKind};
use bucketry_lib::codec::ValueMap;
use bucketry_lib::core::{BucketryError, Result};
use bucketry_lib::storage::{PingRecord, StorageBackend};
use chrono::DateTime;
use chrono_tz::Tz;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One backend write as seen by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: OperationKind,
    pub keys: Vec<String>,
    pub values: ValueMap,
    pub tracking_key: Option<String>,
}

/// Backend that records every write and can be told to fail or to hold
/// writes until released.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<RecordedCall>>,
    failures_left: AtomicUsize,
    gate: Option<Semaphore>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the next `times` writes with a storage error.
    pub fn failing(times: usize) -> Arc<Self> {
        let backend = Self::default();
        backend.failures_left.store(times, Ordering::SeqCst);
        Arc::new(backend)
    }

    /// Hold every write until [`RecordingBackend::release`] lets it through.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    /// Let `writes` held writes complete.
    pub fn release(&self, writes: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(writes);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn pass_gate(&self) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| BucketryError::storage("gate closed"))?
                .forget();
        }
        Ok(())
    }

    fn record(
        &self,
        kind: OperationKind,
        keys: &[BucketKey],
        values: &ValueMap,
        tracking_key: Option<&str>,
    ) -> Result<()> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BucketryError::storage("injected failure"));
        }

        self.calls.lock().unwrap().push(RecordedCall {
            kind,
            keys: keys.iter().map(|key| key.encode(":")).collect(),
            values: values.clone(),
            tracking_key: tracking_key.map(str::to_string),
        });
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for RecordingBackend {
    fn addressing(&self) -> AddressingMode {
        AddressingMode::Separated
    }

    async fn increment(&self, keys: &[BucketKey], values: &ValueMap, tracking_key: Option<&str>) -> Result<()> {
        self.pass_gate().await?;
        self.record(OperationKind::Increment, keys, values, tracking_key)
    }

    async fn set(&self, keys: &[BucketKey], values: &ValueMap, tracking_key: Option<&str>) -> Result<()> {
        self.pass_gate().await?;
        self.record(OperationKind::Set, keys, values, tracking_key)
    }

    async fn get(&self, keys: &[BucketKey]) -> Result<Vec<ValueMap>> {
        Ok(vec![ValueMap::new(); keys.len()])
    }

    async fn ping(&self, _key: &str, _values: &ValueMap) -> Result<()> {
        Ok(())
    }

    async fn scan(&self, _key: &str) -> Result<Option<PingRecord>> {
        Ok(None)
    }
}

/// Parse an RFC 3339 instant into UTC.
pub fn instant(rfc3339: &str) -> DateTime<Tz> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Tz::UTC)
}

/// Hourly key for `name` at 2024-05-01T10:xx UTC.
pub fn hour_key(name: &str) -> BucketKey {
    key(name, "1h", "2024-05-01T10:37:45Z")
}

pub fn key(name: &str, granularity: &str, at: &str) -> BucketKey {
    let granularity: Granularity = granularity.parse().unwrap();
    BucketKey::new(name, granularity, &instant(at), &Calendar::default())
}

/// Buffer config with the timer disabled.
pub fn manual_buffer(size: usize, aggregate: bool) -> BufferConfig {
    BufferConfig {
        enabled: true,
        duration: Duration::ZERO,
        size,
        aggregate,
        async_flush: false,
    }
}

/// Buffer config flushing every `duration` in the background.
pub fn timed_buffer(duration: Duration) -> BufferConfig {
    BufferConfig {
        enabled: true,
        duration,
        size: 1_000,
        aggregate: true,
        async_flush: true,
    }
}
