//! In-memory storage backend.
//!
//! Rows are stored flattened and keyed by each key's simple identifier, the
//! same way a document or key-value backend would lay them out.

use super::{PingRecord, StorageBackend};
use crate::bucket::{AddressingMode, BucketKey, Identifier};
use crate::codec::{self, FlatValue, ValueMap};
use crate::core::{Config, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters.
#[derive(Debug, Default)]
struct StorageCounters {
    increments: AtomicU64,
    sets: AtomicU64,
    reads: AtomicU64,
}

/// Snapshot of [`InMemoryStorage`] activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub rows: usize,
    pub increments: u64,
    pub sets: u64,
    pub reads: u64,
}

pub struct InMemoryStorage {
    rows: DashMap<Identifier<i64>, FlatValue>,
    pings: DashMap<String, PingRecord>,
    /// Writes attributed to each tracking key.
    sources: DashMap<String, u64>,
    addressing: AddressingMode,
    separator: String,
    counters: StorageCounters,
}

impl InMemoryStorage {
    pub fn new(addressing: AddressingMode, separator: impl Into<String>) -> Self {
        Self {
            rows: DashMap::new(),
            pings: DashMap::new(),
            sources: DashMap::new(),
            addressing,
            separator: separator.into(),
            counters: StorageCounters::default(),
        }
    }

    /// Create storage from application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.storage.addressing, config.storage.separator.clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of writes carrying `tracking_key`.
    pub fn writes_from(&self, tracking_key: &str) -> u64 {
        self.sources.get(tracking_key).map_or(0, |count| *count)
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            rows: self.rows.len(),
            increments: self.counters.increments.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
        }
    }

    fn identify(&self, key: &BucketKey) -> Identifier<i64> {
        key.simple_identifier(&self.separator, self.addressing)
    }

    fn attribute(&self, tracking_key: Option<&str>) {
        if let Some(source) = tracking_key {
            *self.sources.entry(source.to_string()).or_insert(0) += 1;
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for InMemoryStorage {
    fn addressing(&self) -> AddressingMode {
        self.addressing
    }

    async fn increment(&self, keys: &[BucketKey], values: &ValueMap, tracking_key: Option<&str>) -> Result<()> {
        let flat = codec::flatten(values);

        // Merge every row before writing any, so a conflict leaves storage untouched.
        let mut staged: HashMap<Identifier<i64>, FlatValue> = HashMap::with_capacity(keys.len());
        for key in keys {
            let id = self.identify(key);
            let merged = match staged.get(&id) {
                Some(row) => codec::merge_add(row, &flat)?,
                None => match self.rows.get(&id) {
                    Some(row) => codec::merge_add(&row, &flat)?,
                    None => flat.clone(),
                },
            };
            staged.insert(id, merged);
        }
        for (id, row) in staged {
            self.rows.insert(id, row);
        }

        self.attribute(tracking_key);
        self.counters.increments.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn set(&self, keys: &[BucketKey], values: &ValueMap, tracking_key: Option<&str>) -> Result<()> {
        let flat = codec::flatten(values);
        for key in keys {
            let mut row = self.rows.entry(self.identify(key)).or_default();
            let merged = codec::merge_overwrite(&row, &flat);
            *row = merged;
        }
        self.attribute(tracking_key);
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, keys: &[BucketKey]) -> Result<Vec<ValueMap>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        keys.iter()
            .map(|key| match self.rows.get(&self.identify(key)) {
                Some(row) => codec::unflatten(&row),
                None => Ok(ValueMap::new()),
            })
            .collect()
    }

    async fn ping(&self, key: &str, values: &ValueMap) -> Result<()> {
        if self.addressing == AddressingMode::FullJoined {
            tracing::trace!(key, "Ignoring ping on full-joined storage");
            return Ok(());
        }
        self.pings.insert(
            key.to_string(),
            PingRecord {
                at: Utc::now(),
                values: values.clone(),
            },
        );
        Ok(())
    }

    async fn scan(&self, key: &str) -> Result<Option<PingRecord>> {
        Ok(self.pings.get(key).map(|record| record.clone()))
    }
}
