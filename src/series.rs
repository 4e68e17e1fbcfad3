//! Bucketed time series over a storage backend.
//!
//! [`Timeseries`] turns one logical write into one [`BucketKey`] per
//! configured granularity, routes it through a write buffer when one is
//! attached, and reads ranges back as `(bucket start, values)` pairs.

use crate::bucket::{BucketKey, Calendar, Granularity};
use crate::buffer::{BufferRegistry, BufferStats, WriteBuffer};
use crate::codec::ValueMap;
use crate::core::{Config, Result};
use crate::storage::{PingRecord, StorageBackend};
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use std::sync::Arc;

pub struct Timeseries {
    calendar: Calendar,
    granularities: Vec<Granularity>,
    prefix: Option<String>,
    backend: Arc<dyn StorageBackend>,
    buffer: Option<WriteBuffer>,
}

impl Timeseries {
    /// Unbuffered series writing straight to `backend`.
    pub fn new(calendar: Calendar, granularities: Vec<Granularity>, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            calendar,
            granularities,
            prefix: None,
            backend,
            buffer: None,
        }
    }

    /// Build a series from configuration. When buffering is enabled a
    /// buffer is spawned and registered with `registry`, so this must run
    /// inside a tokio runtime.
    pub fn from_config(config: &Config, backend: Arc<dyn StorageBackend>, registry: &Arc<BufferRegistry>) -> Self {
        let mut series = Self::new(config.calendar(), config.granularities(), Arc::clone(&backend));
        series.prefix = config.storage.prefix.clone();
        if config.buffer.enabled {
            let name = config.storage.prefix.as_deref().unwrap_or("default");
            series.buffer = Some(WriteBuffer::spawn_registered(
                name,
                backend,
                config.buffer.clone(),
                registry,
            ));
        }
        series
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_buffer(mut self, buffer: WriteBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn granularities(&self) -> &[Granularity] {
        &self.granularities
    }

    pub fn buffer(&self) -> Option<&WriteBuffer> {
        self.buffer.as_ref()
    }

    /// One key per configured granularity for the bucket containing `at`.
    pub fn keys_at<Z: TimeZone>(&self, name: &str, at: &DateTime<Z>) -> Vec<BucketKey> {
        let local = self.calendar.localize(at);
        self.granularities
            .iter()
            .map(|&granularity| self.key(name, granularity, &local))
            .collect()
    }

    /// Keys for every bucket of one granularity between `from` and `to`,
    /// both ends inclusive.
    pub fn keys<Z: TimeZone>(
        &self,
        name: &str,
        granularity: Granularity,
        from: &DateTime<Z>,
        to: &DateTime<Z>,
    ) -> Vec<BucketKey> {
        let from = self.calendar.localize(from);
        let to = self.calendar.localize(to);
        self.calendar
            .timeline(&from, &to, granularity)
            .iter()
            .map(|start| self.key(name, granularity, &start))
            .collect()
    }

    /// Add `values` into every bucket containing `at`.
    pub async fn increment<Z: TimeZone>(
        &self,
        name: &str,
        values: ValueMap,
        at: &DateTime<Z>,
        tracking_key: Option<&str>,
    ) -> Result<()> {
        let keys = self.keys_at(name, at);
        if keys.is_empty() {
            return Ok(());
        }
        match &self.buffer {
            Some(buffer) => {
                buffer
                    .enqueue_increment(keys, values, tracking_key.map(str::to_string))
                    .await
            },
            None => self.backend.increment(&keys, &values, tracking_key).await,
        }
    }

    /// Overwrite `values` in every bucket containing `at`.
    pub async fn set<Z: TimeZone>(
        &self,
        name: &str,
        values: ValueMap,
        at: &DateTime<Z>,
        tracking_key: Option<&str>,
    ) -> Result<()> {
        let keys = self.keys_at(name, at);
        if keys.is_empty() {
            return Ok(());
        }
        match &self.buffer {
            Some(buffer) => buffer.enqueue_set(keys, values, tracking_key.map(str::to_string)).await,
            None => self.backend.set(&keys, &values, tracking_key).await,
        }
    }

    /// Record last-known state for `name`. Pings bypass the buffer.
    pub async fn ping(&self, name: &str, values: &ValueMap) -> Result<()> {
        self.backend.ping(&self.ping_key(name), values).await
    }

    pub async fn scan(&self, name: &str) -> Result<Option<PingRecord>> {
        self.backend.scan(&self.ping_key(name)).await
    }

    /// Read a range as `(bucket start, values)` pairs, oldest first.
    /// Buckets without data read as empty maps. Buffered writes become
    /// visible after the next flush.
    pub async fn series<Z: TimeZone>(
        &self,
        name: &str,
        granularity: Granularity,
        from: &DateTime<Z>,
        to: &DateTime<Z>,
    ) -> Result<Vec<(DateTime<Tz>, ValueMap)>> {
        let keys = self.keys(name, granularity, from, to);
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.backend.get(&keys).await?;
        Ok(keys.iter().map(BucketKey::bucket_start).zip(rows).collect())
    }

    /// Flush the attached buffer, if any.
    pub async fn flush(&self) -> Result<usize> {
        match &self.buffer {
            Some(buffer) => buffer.flush().await,
            None => Ok(0),
        }
    }

    pub async fn buffer_stats(&self) -> Result<Option<BufferStats>> {
        match &self.buffer {
            Some(buffer) => buffer.stats().await.map(Some),
            None => Ok(None),
        }
    }

    /// Shut down the attached buffer, flushing what it holds.
    pub async fn shutdown(&self) -> Result<usize> {
        match &self.buffer {
            Some(buffer) => buffer.shutdown().await,
            None => Ok(0),
        }
    }

    fn key(&self, name: &str, granularity: Granularity, at: &DateTime<Tz>) -> BucketKey {
        let key = BucketKey::new(name, granularity, at, &self.calendar);
        match &self.prefix {
            Some(prefix) => key.with_prefix(prefix.as_str()),
            None => key,
        }
    }

    fn ping_key(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }
}
