//! Batching write buffer in front of a storage backend.
//!
//! Each [`WriteBuffer`] is a handle to a tokio task that owns the queue.
//! Enqueue, flush and shutdown requests travel over one channel and are
//! handled strictly in arrival order, so the queue has a single writer and
//! needs no locks.
//!
//! Operations with the same signature (kind, tracking key, bucketed keys)
//! are merged when aggregation is enabled: increments are summed, sets
//! overwrite. The queue is flushed when the number of enqueue calls reaches
//! `size`, when the flush timer fires (`async` mode with a non-zero
//! `duration`), or on demand. Timer batches are written by a separate task
//! so enqueues keep flowing while the backend is busy.

use super::registry::{BufferId, BufferRegistry};
use crate::bucket::{BucketKey, KeySignature};
use crate::codec::{self, ValueMap};
use crate::core::{BucketryError, Result};
use crate::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Capacity of the command channel feeding each buffer task.
const COMMAND_CAPACITY: usize = 1024;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for write buffer behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Route writes through a buffer at all
    pub enabled: bool,
    /// Interval for timer flushes; zero disables the timer
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Enqueue calls before an inline flush (default: 1,000)
    pub size: usize,
    /// Merge operations sharing a signature
    pub aggregate: bool,
    /// Flush on a timer in the background
    #[serde(rename = "async")]
    pub async_flush: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: Duration::from_secs(1),
            size: 1_000,
            aggregate: true,
            async_flush: true,
        }
    }
}

/// Statistics for buffer monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Enqueue calls since the last flush
    pub pending: usize,
    /// Queue entries after aggregation
    pub queued: usize,
    /// Total operations enqueued since start
    pub total_enqueued: u64,
    /// Total operations written to the backend
    pub total_flushed: u64,
    /// Drained operations lost to a failing backend call
    pub total_dropped: u64,
    /// Number of flushes that wrote at least one operation
    pub flush_count: u64,
    /// Number of flushes that hit a backend error
    pub failed_flushes: u64,
    /// Time of last successful flush
    pub last_flush: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Increment,
    Set,
}

/// Aggregation identity of a buffered operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub kind: OperationKind,
    pub tracking_key: Option<String>,
    pub keys: Vec<KeySignature>,
}

/// One logical write waiting to be flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedOperation {
    pub kind: OperationKind,
    pub keys: Vec<BucketKey>,
    pub values: ValueMap,
    pub tracking_key: Option<String>,
}

impl BufferedOperation {
    pub fn increment(keys: Vec<BucketKey>, values: ValueMap, tracking_key: Option<String>) -> Self {
        Self {
            kind: OperationKind::Increment,
            keys,
            values,
            tracking_key,
        }
    }

    pub fn set(keys: Vec<BucketKey>, values: ValueMap, tracking_key: Option<String>) -> Self {
        Self {
            kind: OperationKind::Set,
            keys,
            values,
            tracking_key,
        }
    }

    pub fn signature(&self) -> Signature {
        Signature {
            kind: self.kind,
            tracking_key: self.tracking_key.clone(),
            keys: self.keys.iter().map(BucketKey::signature).collect(),
        }
    }

    /// Fold a later operation with the same signature into this one.
    fn absorb(&mut self, later: &BufferedOperation) -> Result<()> {
        self.values = match self.kind {
            OperationKind::Increment => codec::merge_add(&self.values, &later.values)?,
            OperationKind::Set => codec::merge_overwrite(&self.values, &later.values),
        };
        Ok(())
    }
}

/// Pending operations, in first-arrival order of their signatures.
#[derive(Debug, Default)]
struct OperationQueue {
    aggregate: bool,
    entries: Vec<BufferedOperation>,
    index: HashMap<Signature, usize>,
}

impl OperationQueue {
    fn new(aggregate: bool) -> Self {
        Self {
            aggregate,
            ..Self::default()
        }
    }

    fn push(&mut self, operation: BufferedOperation) -> Result<()> {
        if !self.aggregate {
            self.entries.push(operation);
            return Ok(());
        }

        let signature = operation.signature();
        match self.index.get(&signature) {
            Some(&position) => self.entries[position].absorb(&operation),
            None => {
                self.index.insert(signature, self.entries.len());
                self.entries.push(operation);
                Ok(())
            },
        }
    }

    fn drain(&mut self) -> Vec<BufferedOperation> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

enum Command {
    Enqueue {
        operation: BufferedOperation,
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        reply: oneshot::Sender<Result<usize>>,
    },
    Stats {
        reply: oneshot::Sender<BufferStats>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<usize>>,
    },
}

/// Result of writing one drained batch to the backend.
struct BatchOutcome {
    total: usize,
    written: usize,
    error: Option<BucketryError>,
}

/// Write `batch` in order, stopping at the first backend error.
async fn write_batch(backend: Arc<dyn StorageBackend>, batch: Vec<BufferedOperation>) -> BatchOutcome {
    let total = batch.len();
    for (written, operation) in batch.iter().enumerate() {
        let tracking_key = operation.tracking_key.as_deref();
        let result = match operation.kind {
            OperationKind::Increment => backend.increment(&operation.keys, &operation.values, tracking_key).await,
            OperationKind::Set => backend.set(&operation.keys, &operation.values, tracking_key).await,
        };
        if let Err(error) = result {
            return BatchOutcome {
                total,
                written,
                error: Some(error),
            };
        }
    }

    BatchOutcome {
        total,
        written: total,
        error: None,
    }
}

/// A timer batch being written by its own task.
struct TimerFlush {
    operations: usize,
    handle: JoinHandle<BatchOutcome>,
}

/// Resolves once the in-flight timer batch is written, never if there is none.
async fn settle(in_flight: &mut Option<TimerFlush>) -> BatchOutcome {
    let Some(flush) = in_flight.as_mut() else {
        return std::future::pending().await;
    };
    let joined = (&mut flush.handle).await;
    let operations = flush.operations;
    *in_flight = None;

    joined.unwrap_or_else(|e| BatchOutcome {
        total: operations,
        written: 0,
        error: Some(BucketryError::storage(format!("flush task failed: {e}"))),
    })
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum Event {
    Command(Option<Command>),
    Timer,
    TimerFlushed(BatchOutcome),
}

/// Task-side state of one buffer.
struct BufferWorker {
    name: String,
    config: BufferConfig,
    backend: Arc<dyn StorageBackend>,
    queue: OperationQueue,
    pending: usize,
    stats: BufferStats,
    deadline: Option<Instant>,
    in_flight: Option<TimerFlush>,
}

impl BufferWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.arm_timer();

        loop {
            let event = tokio::select! {
                command = commands.recv() => Event::Command(command),
                () = wait_until(self.deadline) => Event::Timer,
                outcome = settle(&mut self.in_flight) => Event::TimerFlushed(outcome),
            };

            let command = match event {
                Event::Command(command) => command,
                Event::Timer => {
                    self.start_timer_flush();
                    continue;
                },
                Event::TimerFlushed(outcome) => {
                    self.finish_timer_flush(outcome);
                    continue;
                },
            };

            let Some(command) = command else {
                // Every handle is gone; nobody is left to shut us down.
                if let Err(e) = self.flush().await {
                    tracing::error!(buffer = %self.name, error = %e, "Final flush of abandoned write buffer failed");
                }
                break;
            };

            match command {
                Command::Enqueue { operation, reply } => {
                    let _ = reply.send(self.enqueue(operation).await);
                },
                Command::Flush { reply } => {
                    let _ = reply.send(self.flush().await);
                },
                Command::Stats { reply } => {
                    let _ = reply.send(self.snapshot());
                },
                Command::Shutdown { reply } => {
                    self.deadline = None;
                    let result = self.flush().await;
                    tracing::debug!(buffer = %self.name, "Write buffer shut down");
                    let _ = reply.send(result);
                    break;
                },
            }
        }
    }

    async fn enqueue(&mut self, operation: BufferedOperation) -> Result<()> {
        self.queue.push(operation)?;
        self.pending += 1;
        self.stats.total_enqueued += 1;

        if self.pending >= self.config.size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drain the queue into the backend and rearm the timer. A timer batch
    /// still being written goes first so operations reach the backend in
    /// arrival order.
    async fn flush(&mut self) -> Result<usize> {
        if self.in_flight.is_some() {
            let outcome = settle(&mut self.in_flight).await;
            self.finish_timer_flush(outcome);
        }

        let drained = self.queue.drain();
        self.pending = 0;
        let result = if drained.is_empty() {
            Ok(0)
        } else {
            let outcome = write_batch(Arc::clone(&self.backend), drained).await;
            self.record(outcome)
        };
        self.arm_timer();
        result
    }

    /// Hand the queue to a separate task so callers never wait on a timer
    /// flush. The timer stays disarmed until that task finishes.
    fn start_timer_flush(&mut self) {
        self.deadline = None;
        let batch = self.queue.drain();
        self.pending = 0;
        if batch.is_empty() {
            self.arm_timer();
            return;
        }

        let operations = batch.len();
        let handle = tokio::spawn(write_batch(Arc::clone(&self.backend), batch));
        self.in_flight = Some(TimerFlush { operations, handle });
    }

    /// Timer flushes have no caller: failures are logged and the batch is lost.
    fn finish_timer_flush(&mut self, outcome: BatchOutcome) {
        if let Err(e) = self.record(outcome) {
            tracing::error!(
                buffer = %self.name,
                error = %e,
                category = e.category(),
                "Timed flush failed, buffered operations dropped"
            );
        }
        self.arm_timer();
    }

    /// Fold a written batch into the stats.
    fn record(&mut self, outcome: BatchOutcome) -> Result<usize> {
        self.stats.total_flushed += outcome.written as u64;

        if let Some(e) = outcome.error {
            let dropped = outcome.total - outcome.written;
            self.stats.failed_flushes += 1;
            self.stats.total_dropped += dropped as u64;
            tracing::warn!(
                buffer = %self.name,
                error = %e,
                dropped,
                "Backend rejected buffered operation"
            );
            return Err(e);
        }

        self.stats.flush_count += 1;
        self.stats.last_flush = Some(SystemTime::now());
        tracing::debug!(buffer = %self.name, operations = outcome.total, "Flushed write buffer");
        Ok(outcome.total)
    }

    fn arm_timer(&mut self) {
        self.deadline = (self.config.async_flush && !self.config.duration.is_zero())
            .then(|| Instant::now() + self.config.duration);
    }

    fn snapshot(&self) -> BufferStats {
        BufferStats {
            pending: self.pending,
            queued: self.queue.len(),
            ..self.stats.clone()
        }
    }
}

/// Handle to a running write buffer. Cheap to clone; all clones address
/// the same queue.
#[derive(Clone)]
pub struct WriteBuffer {
    id: BufferId,
    name: String,
    commands: mpsc::Sender<Command>,
    registry: Option<Weak<BufferRegistry>>,
}

impl std::fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl WriteBuffer {
    /// Start a buffer task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(name: impl Into<String>, backend: Arc<dyn StorageBackend>, config: BufferConfig) -> Self {
        let name = name.into();
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let worker = BufferWorker {
            name: name.clone(),
            queue: OperationQueue::new(config.aggregate),
            config,
            backend,
            pending: 0,
            stats: BufferStats::default(),
            deadline: None,
            in_flight: None,
        };
        tokio::spawn(worker.run(receiver));

        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            name,
            commands,
            registry: None,
        }
    }

    /// Start a buffer and register it for [`BufferRegistry::flush_all`].
    pub fn spawn_registered(
        name: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        config: BufferConfig,
        registry: &Arc<BufferRegistry>,
    ) -> Self {
        let mut buffer = Self::spawn(name, backend, config);
        buffer.registry = Some(Arc::downgrade(registry));
        registry.register(buffer.clone());
        buffer
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the buffer has shut down.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Queue an increment. Blocks on backend I/O only when this call
    /// reaches the size threshold and flushes inline.
    pub async fn enqueue_increment(
        &self,
        keys: Vec<BucketKey>,
        values: ValueMap,
        tracking_key: Option<String>,
    ) -> Result<()> {
        self.enqueue(BufferedOperation::increment(keys, values, tracking_key)).await
    }

    /// Queue a set, with the same threshold behaviour as increments.
    pub async fn enqueue_set(&self, keys: Vec<BucketKey>, values: ValueMap, tracking_key: Option<String>) -> Result<()> {
        self.enqueue(BufferedOperation::set(keys, values, tracking_key)).await
    }

    pub async fn enqueue(&self, operation: BufferedOperation) -> Result<()> {
        self.request(|reply| Command::Enqueue { operation, reply }).await?
    }

    /// Write every queued operation to the backend. Returns the number of
    /// operations written.
    pub async fn flush(&self) -> Result<usize> {
        self.request(|reply| Command::Flush { reply }).await?
    }

    pub async fn stats(&self) -> Result<BufferStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Cancel the timer, flush what is queued, deregister, and reject all
    /// further operations. Shutting down twice is a no-op.
    pub async fn shutdown(&self) -> Result<usize> {
        let result = match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(flushed) => flushed,
            Err(BucketryError::BufferShutdown { .. }) => Ok(0),
            Err(e) => Err(e),
        };

        if let Some(registry) = self.registry.as_ref().and_then(Weak::upgrade) {
            registry.deregister(self.id);
        }
        result
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| self.closed_error())?;
        response.await.map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> BucketryError {
        BucketryError::BufferShutdown {
            name: self.name.clone(),
        }
    }
}
