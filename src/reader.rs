//! The read-ahead entry reader aggregate: prefetch state machine, metadata
//! reconciler, idle detector, and lifecycle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::config::ReadAheadConfig;
use crate::dlsn::{Dlsn, EntryPosition};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::metadata::{LogSegmentMetadata, SegmentStatus, TruncationStatus};
use crate::segment_reader::SegmentReader;
use crate::serializer::Serializer;
use crate::store::{EntrySource, MetadataSource};

/// Opaque handle returned by [`ReadAheadEntryReader::add_state_change_notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

struct AggregateState {
    current: Option<Arc<SegmentReader>>,
    current_seg_seq_no: Option<u64>,
    next: Option<Arc<SegmentReader>>,
    queued: VecDeque<Arc<SegmentReader>>,
    next_entry_position: EntryPosition,
    paused: bool,
    initialized: bool,
}

struct ReaderInner {
    entry_source: Arc<dyn EntrySource>,
    metadata_source: Arc<dyn MetadataSource>,
    config: ReadAheadConfig,
    from_dlsn: Dlsn,
    serializer: Serializer,
    cache: Cache,
    state: Mutex<AggregateState>,
    last_error: StdRwLock<Option<Error>>,
    catching_up: AtomicBool,
    last_entry_added: StdMutex<Instant>,
    listeners: StdRwLock<Vec<(u64, Arc<dyn Fn() + Send + Sync>)>>,
    next_listener_id: AtomicU64,
    closing_outstanding: AtomicUsize,
    closing_notify: Notify,
    close_started: AtomicBool,
    close_result: StdMutex<Option<Result<()>>>,
    close_notify: Notify,
    shutdown: Notify,
}

/// The read-ahead entry reader. Cheap to clone; clones share the same
/// underlying state and Serializer.
#[derive(Clone)]
pub struct ReadAheadEntryReader {
    inner: Arc<ReaderInner>,
    idle_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl ReadAheadEntryReader {
    pub fn new(
        entry_source: Arc<dyn EntrySource>,
        metadata_source: Arc<dyn MetadataSource>,
        config: ReadAheadConfig,
        from_dlsn: Dlsn,
    ) -> Self {
        let cache = Cache::new(config.read_ahead_max_records);
        let inner = Arc::new(ReaderInner {
            entry_source,
            metadata_source,
            config,
            from_dlsn,
            serializer: Serializer::new(),
            cache,
            state: Mutex::new(AggregateState {
                current: None,
                current_seg_seq_no: None,
                next: None,
                queued: VecDeque::new(),
                next_entry_position: EntryPosition::from_dlsn(from_dlsn),
                paused: false,
                initialized: false,
            }),
            last_error: StdRwLock::new(None),
            catching_up: AtomicBool::new(true),
            last_entry_added: StdMutex::new(Instant::now()),
            listeners: StdRwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            closing_outstanding: AtomicUsize::new(0),
            closing_notify: Notify::new(),
            close_started: AtomicBool::new(false),
            close_result: StdMutex::new(None),
            close_notify: Notify::new(),
            shutdown: Notify::new(),
        });
        let idle_task = spawn_idle_detector(inner.clone());
        Self {
            inner,
            idle_task: Arc::new(StdMutex::new(idle_task)),
        }
    }

    /// Place `current`/`next`/`queued` so that reading begins at the
    /// reader's configured starting `Dlsn`. A no-op if already initialized.
    pub async fn start(&self, initial_segments: Vec<LogSegmentMetadata>) -> Result<()> {
        let inner = self.inner.clone();
        let from_dlsn = self.inner.from_dlsn;
        let result = self
            .inner
            .serializer
            .run(move || async move { apply_initialize(inner, from_dlsn, initial_segments).await })
            .await;
        self.fold_serialized_result(result)
    }

    /// Feed a pushed metadata update through reconciliation.
    pub async fn on_segments_updated(&self, segments: Vec<LogSegmentMetadata>) -> Result<()> {
        let inner = self.inner.clone();
        let result = self
            .inner
            .serializer
            .run(move || async move { apply_reinitialize(inner, segments).await })
            .await;
        self.fold_serialized_result(result)
    }

    /// The stream has been deleted; latch a fatal `LogNotFound`.
    pub fn on_log_stream_deleted(&self) {
        set_last_error(&self.inner, Error::LogNotFound);
        notify_listeners(&self.inner);
    }

    fn fold_serialized_result(&self, result: Option<Result<()>>) -> Result<()> {
        match result {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                set_last_error(&self.inner, e.clone());
                notify_listeners(&self.inner);
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Poll the cache with a timeout. `lastError`, once set, is re-raised on
    /// every call before the queue is even polled (entries already buffered
    /// before a failure are not drained).
    pub async fn get_next_read_ahead_entry(&self, timeout: Duration) -> Result<Option<Entry>> {
        if let Some(err) = self.inner.last_error.read().unwrap().clone() {
            return Err(err);
        }
        let entry = self.inner.cache.pop(timeout).await;
        if entry.is_some() {
            resume_read_ahead_if_possible(self.inner.clone()).await;
        }
        Ok(entry)
    }

    pub async fn get_num_cached_entries(&self) -> usize {
        self.inner.cache.len().await
    }

    pub async fn is_cache_full(&self) -> bool {
        self.inner.cache.is_full().await
    }

    pub async fn is_cache_empty(&self) -> bool {
        self.inner.cache.is_empty().await
    }

    pub fn is_reader_idle(&self, threshold: Duration) -> bool {
        self.inner.last_entry_added.lock().unwrap().elapsed() > threshold
    }

    pub fn is_read_ahead_caught_up(&self) -> bool {
        !self.inner.catching_up.load(Ordering::Acquire)
    }

    /// The position the read-ahead loop will next request from the current
    /// segment, advanced after each delivered batch.
    pub async fn current_read_position(&self) -> EntryPosition {
        self.inner.state.lock().await.next_entry_position
    }

    pub fn add_state_change_notification<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap()
            .push((id, Arc::new(f)));
        ListenerHandle(id)
    }

    pub fn remove_state_change_notification(&self, handle: ListenerHandle) {
        self.inner
            .listeners
            .write()
            .unwrap()
            .retain(|(id, _)| *id != handle.0);
    }

    /// First caller wins and runs the close; later callers observe the same
    /// result once it completes.
    pub async fn close(&self) -> Result<()> {
        self.inner.shutdown.notify_waiters();
        if let Some(handle) = self.idle_task.lock().unwrap().take() {
            handle.abort();
        }

        if !self.inner.close_started.swap(true, Ordering::AcqRel) {
            let inner = self.inner.clone();
            let fallback = self.inner.clone();
            let outcome = match self.inner.serializer.run(move || close_task(inner)).await {
                Some(result) => result,
                // Submission rejected (the drain task already died): run the
                // close inline so the sub-readers still get closed.
                None => close_task(fallback).await,
            };
            *self.inner.close_result.lock().unwrap() = Some(outcome.clone());
            self.inner.serializer.mark_closed();
            self.inner.close_notify.notify_waiters();
            outcome
        } else {
            loop {
                if let Some(result) = self.inner.close_result.lock().unwrap().clone() {
                    return result;
                }
                self.inner.close_notify.notified().await;
            }
        }
    }
}

fn set_last_error(inner: &Arc<ReaderInner>, err: Error) {
    let mut guard = inner.last_error.write().unwrap();
    if guard.is_none() {
        tracing::error!(error = %err, "read-ahead reader latched a fatal error");
        *guard = Some(err);
    }
}

fn notify_listeners(inner: &Arc<ReaderInner>) {
    let listeners = inner.listeners.read().unwrap();
    for (_, listener) in listeners.iter() {
        listener();
    }
}

fn make_caught_up_callback(inner: Arc<ReaderInner>) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || {
        inner.catching_up.store(false, Ordering::Release);
    })
}

fn is_allowed_to_position(
    segment: &LogSegmentMetadata,
    start: Dlsn,
    ignore_truncation: bool,
    alert_when_positioning_on_truncated: bool,
) -> Result<()> {
    if let TruncationStatus::Full { last } = segment.truncation {
        if last >= start && !ignore_truncation {
            return Err(Error::AlreadyTruncated {
                start,
                last: Some(last),
            });
        }
    }
    if let TruncationStatus::Partial { min_active } = segment.truncation {
        if min_active > start {
            if alert_when_positioning_on_truncated {
                tracing::warn!(
                    seg_seq_no = segment.seg_seq_no,
                    %start,
                    %min_active,
                    "positioning inside a partially truncated segment"
                );
            }
            if !ignore_truncation {
                return Err(Error::AlreadyTruncated { start, last: None });
            }
        }
    }
    Ok(())
}

/// `apply-initialize` (§4.3): invoked the first time a non-empty segment list
/// arrives after `start()`.
async fn apply_initialize(
    inner: Arc<ReaderInner>,
    from_dlsn: Dlsn,
    segments: Vec<LogSegmentMetadata>,
) -> Result<()> {
    let mut state = inner.state.lock().await;
    if state.initialized {
        return Ok(());
    }

    let ignore_truncation = inner.config.ignore_truncation_status;
    let alert_on_truncated = inner.config.alert_when_positioning_on_truncated;

    let mut candidates: Vec<(LogSegmentMetadata, Dlsn)> = Vec::new();
    let mut effective_start = from_dlsn;
    let mut truncation_skipping_enabled = true;
    let mut truncated_away: Option<Dlsn> = None;

    for segment in segments.into_iter() {
        if segment.seg_seq_no < from_dlsn.seg_seq_no {
            continue;
        }
        let mut this_start = if truncation_skipping_enabled {
            effective_start
        } else {
            Dlsn::new(segment.seg_seq_no, 0, 0)
        };
        if truncation_skipping_enabled {
            if let TruncationStatus::Full { last } = segment.truncation {
                if !ignore_truncation {
                    effective_start = Dlsn::new(segment.seg_seq_no + 1, 0, 0);
                    truncated_away = Some(last);
                    continue;
                }
            }
            if let TruncationStatus::Partial { min_active } = segment.truncation {
                if min_active > this_start {
                    this_start = min_active;
                }
            }
        }
        is_allowed_to_position(&segment, this_start, ignore_truncation, alert_on_truncated)?;
        candidates.push((segment, this_start));
        truncation_skipping_enabled = false;
    }

    if candidates.is_empty() {
        // Nothing survived. If that's because every remaining segment was
        // fully truncated out from under us (rather than simply not having
        // appeared in metadata yet), the requested position is genuinely
        // gone: there is no later segment to transparently land on.
        return match truncated_away {
            Some(last) => Err(Error::AlreadyTruncated {
                start: from_dlsn,
                last: Some(last),
            }),
            None => Ok(()),
        };
    }

    let mut readers: VecDeque<Arc<SegmentReader>> = VecDeque::new();
    for (segment, start) in candidates {
        let start_entry_id = if segment.seg_seq_no == start.seg_seq_no {
            start.entry_id
        } else {
            0
        };
        readers.push_back(Arc::new(SegmentReader::new(
            inner.entry_source.clone(),
            segment,
            start_entry_id,
            make_caught_up_callback(inner.clone()),
        )));
    }

    let head = readers.pop_front().expect("candidates is non-empty");
    for queued in readers.iter() {
        queued.begin_opening();
    }

    let head_seg_seq_no = head.seg_seq_no();
    let head_start = head.start_entry_id();
    head.start_read().await?;

    state.current = Some(head);
    state.current_seg_seq_no = Some(head_seg_seq_no);
    state.next_entry_position = EntryPosition::new(head_seg_seq_no, head_start);
    state.queued = readers;
    state.initialized = true;
    drop(state);

    schedule_read_next(inner.clone());
    prefetch_next(inner.clone(), true).await;

    Ok(())
}

/// `apply-reinitialize` (§4.4): invoked for every subsequent metadata update
/// while initialized. Routes back through `apply-initialize` if the reader
/// was never initialized to begin with (§9's resolved open question).
async fn apply_reinitialize(inner: Arc<ReaderInner>, segments: Vec<LogSegmentMetadata>) -> Result<()> {
    let from_dlsn = inner.from_dlsn;
    let mut state = inner.state.lock().await;
    if !state.initialized {
        drop(state);
        return apply_initialize(inner, from_dlsn, segments).await;
    }

    let mut idx = 0usize;
    if let Some(cur_seq) = state.current_seg_seq_no {
        while idx < segments.len() && segments[idx].seg_seq_no < cur_seq {
            idx += 1;
        }
    }
    if idx >= segments.len() {
        return Ok(());
    }

    if let Some(current) = state.current.clone() {
        if idx < segments.len() && segments[idx].seg_seq_no == current.seg_seq_no() {
            let update = segments[idx].clone();
            drop(state);
            current.update_metadata(update).await?;
            state = inner.state.lock().await;
            idx += 1;
        } else {
            return Err(Error::InconsistentMetadata(format!(
                "expected segment {} at reconciliation position",
                current.seg_seq_no()
            )));
        }
    } else if let Some(cur_seq) = state.current_seg_seq_no {
        if segments[idx].seg_seq_no != cur_seq {
            return Err(Error::InconsistentMetadata(format!(
                "expected segment {} at reconciliation position, found {}",
                cur_seq, segments[idx].seg_seq_no
            )));
        }
        // Already finished this segment; do not re-open it.
        idx += 1;
    }

    if let Some(next) = state.next.clone() {
        if idx < segments.len() && segments[idx].seg_seq_no == next.seg_seq_no() {
            let update = segments[idx].clone();
            drop(state);
            next.update_metadata(update).await?;
            state = inner.state.lock().await;
            idx += 1;
        }
    }

    let queued_snapshot: Vec<Arc<SegmentReader>> = state.queued.iter().cloned().collect();
    drop(state);
    for queued in queued_snapshot {
        if idx >= segments.len() {
            break;
        }
        if segments[idx].seg_seq_no == queued.seg_seq_no() {
            let update = segments[idx].clone();
            queued.update_metadata(update).await?;
            idx += 1;
        }
    }
    state = inner.state.lock().await;

    while idx < segments.len() {
        let segment = segments[idx].clone();
        let reader = Arc::new(SegmentReader::new(
            inner.entry_source.clone(),
            segment,
            0,
            make_caught_up_callback(inner.clone()),
        ));
        reader.begin_opening();
        state.queued.push_back(reader);
        idx += 1;
    }

    let current_absent = state.current.is_none();
    drop(state);

    if current_absent {
        apply_move_to_next(inner.clone()).await;
    }

    resume_read_ahead_if_possible(inner).await;
    Ok(())
}

/// `apply-prefetch-next` (§4.8): peeks the head of `queued`; if present and
/// (`!only_in_progress` or it is in-progress), starts it and promotes it to
/// `next`.
async fn prefetch_next(inner: Arc<ReaderInner>, only_in_progress: bool) {
    let mut state = inner.state.lock().await;
    if state.next.is_some() {
        return;
    }
    if state.queued.is_empty() {
        return;
    }
    if only_in_progress {
        drop(state);
        let head_status = {
            let state = inner.state.lock().await;
            match state.queued.front() {
                Some(reader) => Some(reader.status().await),
                None => None,
            }
        };
        if head_status != Some(SegmentStatus::InProgress) {
            return;
        }
        state = inner.state.lock().await;
    }
    let reader = match state.queued.pop_front() {
        Some(r) => r,
        None => return,
    };
    drop(state);
    let _ = reader.start_read().await;
    let mut state = inner.state.lock().await;
    state.next = Some(reader);
}

/// `apply-schedule-read-next` (§4.7): issues `readNext` on `current` outside
/// the Serializer (the suspension point), then posts the completion handler
/// back onto the Serializer.
fn schedule_read_next(inner: Arc<ReaderInner>) {
    tokio::spawn(async move {
        let current = {
            let state = inner.state.lock().await;
            state.current.clone()
        };
        let Some(current) = current else {
            let mut state = inner.state.lock().await;
            state.paused = true;
            return;
        };
        let batch_size = inner.config.read_ahead_batch_size;
        let result = current.read_next(batch_size).await;
        inner.serializer.submit(move || async move {
            handle_read_next_completion(inner, result).await;
        });
    });
}

/// Read-ahead loop completion handling (§4.7).
async fn handle_read_next_completion(inner: Arc<ReaderInner>, result: Result<Vec<Entry>>) {
    match result {
        Ok(batch) => {
            *inner.last_entry_added.lock().unwrap() = Instant::now();
            if !batch.is_empty() {
                let last = batch.last().expect("checked non-empty").clone();
                inner.cache.push_batch(batch).await;
                let mut state = inner.state.lock().await;
                state.next_entry_position = EntryPosition::new(last.seg_seq_no, last.entry_id + 1);
                drop(state);
            }
            notify_listeners(&inner);

            if inner.cache.is_full().await {
                let mut state = inner.state.lock().await;
                state.paused = true;
                drop(state);
                if !inner.cache.is_full().await {
                    resume_read_ahead_if_possible(inner.clone()).await;
                }
            } else {
                schedule_read_next(inner.clone());
            }
        }
        Err(Error::EndOfLogSegment) => {
            apply_move_to_next(inner.clone()).await;
        }
        Err(e) => {
            set_last_error(&inner, e);
            notify_listeners(&inner);
        }
    }
}

/// `apply-move-to-next` (§4.8).
async fn apply_move_to_next(inner: Arc<ReaderInner>) {
    let (old_current, mut promoted) = {
        let mut state = inner.state.lock().await;
        (state.current.take(), state.next.take())
    };

    if let Some(old) = old_current {
        begin_closing(inner.clone(), old);
    }

    if promoted.is_none() {
        prefetch_next(inner.clone(), false).await;
        let mut state = inner.state.lock().await;
        promoted = state.next.take();
    }

    match promoted {
        Some(reader) => {
            let seg_seq_no = reader.seg_seq_no();
            let start_entry_id = reader.start_entry_id();
            {
                let mut state = inner.state.lock().await;
                state.current_seg_seq_no = Some(seg_seq_no);
                state.current = Some(reader.clone());
                state.next_entry_position = EntryPosition::new(seg_seq_no, start_entry_id);
            }
            if let Err(e) = reader.start_read().await {
                set_last_error(&inner, e);
                notify_listeners(&inner);
                return;
            }
            schedule_read_next(inner.clone());
            prefetch_next(inner.clone(), true).await;
        }
        None => {
            inner.catching_up.store(false, Ordering::Release);
            let mut state = inner.state.lock().await;
            state.paused = true;
        }
    }
}

fn begin_closing(inner: Arc<ReaderInner>, reader: Arc<SegmentReader>) {
    inner.closing_outstanding.fetch_add(1, Ordering::AcqRel);
    tokio::spawn(async move {
        if let Err(e) = reader.close().await {
            tracing::warn!(seg_seq_no = reader.seg_seq_no(), error = %e, "error closing segment reader");
        }
        if inner.closing_outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            inner.closing_notify.notify_waiters();
        }
    });
}

/// Resumes a paused read-ahead once the cache has drained below the
/// threshold, from either the consumer dequeue path or after reconciliation.
async fn resume_read_ahead_if_possible(inner: Arc<ReaderInner>) {
    let full = inner.cache.is_full().await;
    let mut state = inner.state.lock().await;
    if state.paused && state.current.is_some() && !full {
        state.paused = false;
        drop(state);
        schedule_read_next(inner);
    }
}

fn spawn_idle_detector(inner: Arc<ReaderInner>) -> Option<JoinHandle<()>> {
    if !inner.config.idle_detector_enabled() {
        return None;
    }
    let period = inner.config.idle_check_interval();
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if is_idle_and_stuck(&inner, period).await {
                        match inner.metadata_source.read_log_segments().await {
                            Ok(segments) => {
                                let inner = inner.clone();
                                let _ = inner.serializer.run(move || async move {
                                    apply_reinitialize(inner.clone(), segments).await
                                }).await;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "idle-triggered metadata refresh failed, retrying next tick");
                            }
                        }
                    }
                }
                _ = inner.shutdown.notified() => break,
            }
        }
    }))
}

async fn is_idle_and_stuck(inner: &Arc<ReaderInner>, threshold: Duration) -> bool {
    let idle = inner.last_entry_added.lock().unwrap().elapsed() > threshold;
    if !idle {
        return false;
    }
    let current = inner.state.lock().await.current.clone();
    match current {
        None => true,
        Some(reader) => reader.is_beyond_last_add_confirmed().await,
    }
}

/// Close task (§4.12): moves `current`/`next`/`queued` into closing, closes
/// each exactly once, and waits for every outstanding close (including ones
/// already initiated by `apply-move-to-next`) to finish.
async fn close_task(inner: Arc<ReaderInner>) -> Result<()> {
    let (current, next, queued) = {
        let mut state = inner.state.lock().await;
        (state.current.take(), state.next.take(), std::mem::take(&mut state.queued))
    };

    let mut handles = Vec::new();
    for reader in current.into_iter().chain(next).chain(queued) {
        handles.push(tokio::spawn(async move { reader.close().await }));
    }

    loop {
        // Register interest before checking, so a `begin_closing` completion
        // between the check and the wait is not missed.
        let notified = inner.closing_notify.notified();
        if inner.closing_outstanding.load(Ordering::Acquire) == 0 {
            break;
        }
        notified.await;
    }

    let mut first_err = None;
    for handle in handles {
        if let Ok(Err(e)) = handle.await {
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
