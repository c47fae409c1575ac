//! Per-segment wrapper: open, start, read batches, track LAC, close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::metadata::{LogSegmentMetadata, SegmentStatus};
use crate::store::{EntrySource, InnerEntryReader, StateChangeListener};

/// Invokes a callback when the inner reader reports it has caught up to the
/// segment's Last Add Confirmed. Held by the inner reader as a registered
/// listener; avoids a back-reference cycle from `SegmentReader` to the
/// aggregate by carrying only a closure.
struct CaughtUpListener {
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl StateChangeListener for CaughtUpListener {
    fn on_caught_up_on_inprogress(&self) {
        (self.callback)();
    }
}

/// Wraps a single segment's lifecycle: `Unopened -> Opening -> Open -> Reading
/// -> Closed`, with a terminal `OpenFailed` absorbed lazily at first read.
pub struct SegmentReader {
    entry_source: Arc<dyn EntrySource>,
    seg_seq_no: u64,
    start_entry_id: i64,
    metadata: Mutex<LogSegmentMetadata>,
    on_caught_up: Arc<dyn Fn() + Send + Sync>,
    opened: OnceCell<std::result::Result<Arc<dyn InnerEntryReader>, Error>>,
    is_started: AtomicBool,
    is_closed: AtomicBool,
}

impl SegmentReader {
    pub fn new(
        entry_source: Arc<dyn EntrySource>,
        metadata: LogSegmentMetadata,
        start_entry_id: i64,
        on_caught_up: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            entry_source,
            seg_seq_no: metadata.seg_seq_no,
            start_entry_id,
            metadata: Mutex::new(metadata),
            on_caught_up,
            opened: OnceCell::new(),
            is_started: AtomicBool::new(false),
            is_closed: AtomicBool::new(false),
        }
    }

    pub fn seg_seq_no(&self) -> u64 {
        self.seg_seq_no
    }

    pub fn start_entry_id(&self) -> i64 {
        self.start_entry_id
    }

    pub async fn status(&self) -> SegmentStatus {
        self.metadata.lock().await.status
    }

    /// Idempotent: requests an open from the entry store the first time it is
    /// called; concurrent and later callers observe the same cached result,
    /// including a cached failure (lazy fault, absorbed here and replayed on
    /// the first `read_next`).
    async fn ensure_opened(&self) -> std::result::Result<Arc<dyn InnerEntryReader>, Error> {
        let metadata = self.metadata.lock().await.clone();
        let entry_source = self.entry_source.clone();
        let start_entry_id = self.start_entry_id;
        let callback = self.on_caught_up.clone();
        let result = self
            .opened
            .get_or_init(|| async move {
                let opened = entry_source.open_reader(metadata.clone(), start_entry_id).await;
                if let Ok(inner) = &opened {
                    if metadata.status == SegmentStatus::InProgress {
                        inner.register_listener(Arc::new(CaughtUpListener { callback }));
                    }
                }
                opened
            })
            .await;
        result.clone()
    }

    /// Begin opening without waiting for completion; used to eagerly open
    /// queued segments.
    pub fn begin_opening(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.ensure_opened().await {
                tracing::debug!(seg_seq_no = this.seg_seq_no, error = %e, "background segment open failed, deferred to first read");
            }
        });
    }

    /// Idempotent: starts the inner reader once opened.
    pub async fn start_read(&self) -> Result<()> {
        let inner = self.ensure_opened().await?;
        if !self.is_started.swap(true, Ordering::AcqRel) {
            inner.start().await?;
        }
        Ok(())
    }

    pub async fn read_next(&self, num_entries: usize) -> Result<Vec<Entry>> {
        let inner = self.ensure_opened().await?;
        if !self.is_started.swap(true, Ordering::AcqRel) {
            inner.start().await?;
        }
        let in_progress = self.metadata.lock().await.status == SegmentStatus::InProgress;
        let batch = inner.read_next(num_entries).await?;
        if in_progress && inner.has_caught_up_on_inprogress() {
            (self.on_caught_up)();
        }
        Ok(batch)
    }

    /// Accepts only consistent updates (§4.6): rejects a positional mismatch
    /// or a Closed->InProgress regression as `InconsistentMetadata`.
    /// Propagates to the inner reader only on an InProgress->Closed
    /// transition; no-ops when nothing materially changed.
    pub async fn update_metadata(&self, new: LogSegmentMetadata) -> Result<()> {
        let mut guard = self.metadata.lock().await;
        let old = guard.clone();
        if new.seg_seq_no != old.seg_seq_no {
            return Err(Error::InconsistentMetadata(format!(
                "segment {} received metadata update for segment {}",
                old.seg_seq_no, new.seg_seq_no
            )));
        }
        if old.status == SegmentStatus::Closed && new.status == SegmentStatus::InProgress {
            return Err(Error::InconsistentMetadata(format!(
                "segment {} regressed from closed to in-progress",
                old.seg_seq_no
            )));
        }
        let transitioning_to_closed =
            old.status == SegmentStatus::InProgress && new.status == SegmentStatus::Closed;
        let unchanged = old == new;
        *guard = new.clone();
        drop(guard);

        if unchanged || !transitioning_to_closed {
            return Ok(());
        }
        if let Some(Ok(inner)) = self.opened.get() {
            inner.update_metadata(new).await?;
        }
        Ok(())
    }

    /// Immediate success if never opened; otherwise closes the inner reader.
    /// Idempotent: a second call is a no-op success.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(Ok(inner)) = self.opened.get() {
            inner.async_close().await?;
        }
        Ok(())
    }

    pub async fn is_beyond_last_add_confirmed(&self) -> bool {
        matches!(self.opened.get(), Some(Ok(inner)) if inner.is_beyond_last_add_confirmed())
    }
}
