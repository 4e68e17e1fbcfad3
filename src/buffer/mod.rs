//! Write buffering between callers and storage.

pub mod registry;
pub mod write_buffer;

// Re-export commonly used types
pub use registry::{BufferId, BufferRegistry};
pub use write_buffer::{
    BufferConfig, BufferStats, BufferedOperation, OperationKind, Signature, WriteBuffer,
};
