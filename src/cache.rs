//! Bounded FIFO between the read-ahead producer and the consumer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::entry::Entry;

/// Bounded entry queue. `max_cached_entries` is a pause threshold, not a hard
/// cap: a single in-flight batch may push the queue briefly past it.
pub struct Cache {
    max_cached_entries: usize,
    entries: Mutex<VecDeque<Entry>>,
    notify: Notify,
}

impl Cache {
    pub fn new(max_cached_entries: usize) -> Self {
        Self {
            max_cached_entries,
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push_batch(&self, batch: Vec<Entry>) {
        if batch.is_empty() {
            return;
        }
        let mut guard = self.entries.lock().await;
        guard.extend(batch);
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Pop the head entry, waiting up to `timeout` if the queue is empty.
    /// Returns `None` if the timeout elapses with nothing delivered.
    pub async fn pop(&self, timeout: Duration) -> Option<Entry> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking, so a push between the check
            // and the wait is not missed.
            let notified = self.notify.notified();
            {
                let mut guard = self.entries.lock().await;
                if let Some(entry) = guard.pop_front() {
                    return Some(entry);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_full(&self) -> bool {
        self.len().await >= self.max_cached_entries
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn max_cached_entries(&self) -> usize {
        self.max_cached_entries
    }
}
