//! Single-writer ordered task executor.
//!
//! Guarantees FIFO, non-overlapping execution of submitted work for one
//! reader instance. Modeled after the handle/background-task split used by
//! [`crate`]'s teacher for its write-ahead log writer: a cloneable front
//! handle feeds an unbounded channel drained by one spawned task.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Per-stream ordered executor. One instance per `ReadAheadEntryReader`
/// satisfies "keyed by stream name": each reader already corresponds to
/// exactly one stream.
pub struct Serializer {
    sender: mpsc::UnboundedSender<Job>,
    closed: Arc<AtomicBool>,
}

impl Serializer {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job().await;
            }
        });
        Self {
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue `f` for serialized execution. Submission after [`Self::mark_closed`]
    /// is a silent no-op. A submission rejected because the executor task has
    /// already shut down is logged and dropped, matching the source's
    /// "treated as a no-op with a log message" rule.
    pub fn submit<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let job: Job = Box::new(move || Box::pin(f()));
        if self.sender.send(job).is_err() {
            tracing::warn!("serializer submission rejected: executor has shut down");
        }
    }

    /// Enqueue `f` and wait for it to run, returning its result. Returns
    /// `None` if the executor is closed or has shut down (the caller should
    /// treat this as "no-op", mirroring `submit`'s silent-drop behavior).
    pub async fn run<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move || async move {
            let _ = tx.send(f().await);
        });
        rx.await.ok()
    }

    /// Mark the executor closed. Further submissions are dropped without
    /// reaching the channel. Called once the close promise has been
    /// installed (§4.12 step 4).
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}
