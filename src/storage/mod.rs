//! Storage backends for bucketed values.
//!
//! Database-specific backends live outside this crate and implement
//! [`StorageBackend`]; [`InMemoryStorage`] is the reference implementation.

pub mod backend;
pub mod memory;

// Re-export commonly used types
pub use backend::{PingRecord, StorageBackend};
pub use memory::{InMemoryStorage, MemoryStats};
