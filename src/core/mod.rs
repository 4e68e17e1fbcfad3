//! Configuration and error types shared by every bucketry module.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, LogLevel};
pub use error::{BucketryError, Result};
