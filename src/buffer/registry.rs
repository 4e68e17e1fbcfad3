//! Process-wide set of live write buffers.
//!
//! Buffers register on spawn and deregister when shut down. At process
//! exit [`BufferRegistry::flush_all`] shuts down whatever is still live so
//! queued writes reach storage.

use super::WriteBuffer;
use crate::core::Result;
use dashmap::DashMap;
use futures::future::join_all;

pub type BufferId = u64;

#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: DashMap<BufferId, WriteBuffer>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, buffer: WriteBuffer) {
        tracing::debug!(buffer = %buffer.name(), id = buffer.id(), "Registered write buffer");
        self.buffers.insert(buffer.id(), buffer);
    }

    /// Forget a buffer. Returns false if it was not registered.
    pub fn deregister(&self, id: BufferId) -> bool {
        self.buffers.remove(&id).is_some()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Shut down every registered buffer concurrently.
    ///
    /// Each failure is logged. Returns the total number of operations
    /// flushed, or the first error encountered once all buffers are done.
    pub async fn flush_all(&self) -> Result<usize> {
        let buffers: Vec<WriteBuffer> = self.buffers.iter().map(|entry| entry.value().clone()).collect();
        if buffers.is_empty() {
            return Ok(0);
        }

        let results = join_all(buffers.iter().map(|buffer| buffer.shutdown())).await;

        let mut flushed = 0;
        let mut first_error = None;
        for (buffer, result) in buffers.iter().zip(results) {
            match result {
                Ok(count) => flushed += count,
                Err(e) => {
                    tracing::error!(buffer = %buffer.name(), error = %e, "Failed to flush write buffer on exit");
                    first_error.get_or_insert(e);
                },
            }
        }

        tracing::info!(buffers = buffers.len(), operations = flushed, "Flushed write buffers");
        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }
}
