use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Error type returned by background tasks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

struct QueuedTask {
    name: &'static str,
    future: TaskFuture,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Rejected because the queue was full or closed.
    pub dropped: u64,
}

/// Bounded queue for fire-and-forget work (audit writes, heartbeat touches).
///
/// `submit` never blocks: when the queue is full the task is dropped and
/// counted. A single worker drains the queue; it exits once every handle
/// has been dropped.
#[derive(Clone)]
pub struct BackgroundQueue {
    sender: mpsc::Sender<QueuedTask>,
    counters: Arc<Counters>,
}

impl BackgroundQueue {
    /// Starts the queue worker on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn start(capacity: usize) -> (Self, JoinHandle<()>) {
        assert!(capacity > 0, "capacity must be > 0");
        let (sender, receiver) = mpsc::channel::<QueuedTask>(capacity);
        let counters = Arc::new(Counters::default());

        let handle = tokio::spawn(run_worker(receiver, Arc::clone(&counters)));

        (Self { sender, counters }, handle)
    }

    /// Queues a task. Returns false when it was dropped.
    pub fn submit<F>(&self, name: &'static str, future: F) -> bool
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let task = QueuedTask {
            name,
            future: Box::pin(future),
        };

        match self.sender.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Background queue full, dropping task '{}'", task.name);
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Background queue closed, dropping task '{}'", task.name);
                false
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<QueuedTask>, counters: Arc<Counters>) {
    debug!("Background queue worker started");

    while let Some(task) = receiver.recv().await {
        match task.future.await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Background task '{}' failed: {}", task.name, e);
            }
        }
    }

    debug!("Background queue worker stopped");
}
