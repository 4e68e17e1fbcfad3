//! Bucketry - calendar-aware time-bucketed counters and gauges.
//!
//! Bucketry turns a stream of `(name, values, instant)` writes into rows
//! keyed by calendar buckets, one per configured granularity, and stores
//! them through a pluggable backend. Writes can pass through a batching
//! buffer that merges repeated increments before they reach storage.
//!
//! # Features
//!
//! - **Granularities**: `30s`, `15m`, `1h`, `1d`, `1w`, `1mo`, `1q`, `1y`
//! - **Calendar flooring**: zone-aware, with configurable week start
//! - **Nested values**: flattened to dotted paths for storage
//! - **Write buffering**: size and timer triggered flushes with aggregation
//!
//! # Architecture
//!
//! - `bucket`: granularity parsing, calendar arithmetic, bucket keys
//! - `codec`: value model, flatten/unflatten, merge policies
//! - `storage`: backend contract and the in-memory backend
//! - `buffer`: write buffer actor and process-wide registry
//! - `series`: multi-granularity read and write facade
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bucketry_lib::buffer::BufferRegistry;
//! use bucketry_lib::codec::value_map;
//! use bucketry_lib::storage::InMemoryStorage;
//! use bucketry_lib::{Config, Timeseries};
//!
//! #[tokio::main]
//! async fn main() -> bucketry_lib::Result<()> {
//!     let config = Config::new()?;
//!     let registry = Arc::new(BufferRegistry::new());
//!     let storage = Arc::new(InMemoryStorage::from_config(&config));
//!     let series = Timeseries::from_config(&config, storage, &registry);
//!
//!     series.increment("hits", value_map([("count", 1)]), &chrono::Utc::now(), None).await?;
//!     registry.flush_all().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bucket;
pub mod buffer;
pub mod cli;
pub mod codec;
pub mod core;
pub mod series;
pub mod storage;

// Re-export core types for convenience
pub use crate::bucket::{BucketKey, Calendar, Granularity, GranularitySpec};
pub use crate::core::{BucketryError, Config, Result};
pub use crate::series::Timeseries;
