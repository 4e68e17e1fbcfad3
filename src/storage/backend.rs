//! Storage backend contract.

use crate::bucket::{AddressingMode, BucketKey};
use crate::codec::ValueMap;
use crate::core::Result;
use chrono::{DateTime, Utc};

/// Last-known state recorded by [`StorageBackend::ping`].
#[derive(Debug, Clone, PartialEq)]
pub struct PingRecord {
    pub at: DateTime<Utc>,
    pub values: ValueMap,
}

/// Trait for storage backend implementations.
///
/// Values may contain nested maps; backends address sub-paths through
/// [`crate::codec::flatten`].
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Addressing mode, fixed when the backend is constructed.
    fn addressing(&self) -> AddressingMode;

    /// Atomic upsert-and-add of `values` into every key.
    async fn increment(&self, keys: &[BucketKey], values: &ValueMap, tracking_key: Option<&str>) -> Result<()>;

    /// Atomic upsert-and-overwrite of `values` into every key.
    async fn set(&self, keys: &[BucketKey], values: &ValueMap, tracking_key: Option<&str>) -> Result<()>;

    /// One map per key, in key order. Missing rows are empty maps.
    async fn get(&self, keys: &[BucketKey]) -> Result<Vec<ValueMap>>;

    /// Record last-known state for `key` outside the bucketing scheme.
    /// Full-joined backends accept the call and do nothing.
    async fn ping(&self, key: &str, values: &ValueMap) -> Result<()>;

    /// Most recent [`ping`](Self::ping) for `key`.
    async fn scan(&self, key: &str) -> Result<Option<PingRecord>>;
}
