//! In-memory `EntrySource`/`MetadataSource` fixtures for exercising
//! `ReadAheadEntryReader` without a real log store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;

use readahead::prelude::*;

struct SegmentData {
    entries: Vec<Entry>,
    status: SegmentStatus,
    truncation: TruncationStatus,
    /// Override for `last_dlsn` on segments that carry no backing entries
    /// (e.g. a fully truncated segment whose entries were already deleted).
    last_dlsn_override: Option<Dlsn>,
}

/// Shared in-memory log: segments keyed by `seg_seq_no`, each a growable
/// entry list that can be sealed independently of the reader under test.
#[derive(Clone)]
pub struct FakeLog {
    segments: Arc<StdMutex<HashMap<u64, Arc<StdMutex<SegmentData>>>>>,
}

impl FakeLog {
    pub fn new() -> Self {
        Self {
            segments: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    fn segment(&self, seg_seq_no: u64) -> Arc<StdMutex<SegmentData>> {
        self.segments
            .lock()
            .unwrap()
            .entry(seg_seq_no)
            .or_insert_with(|| {
                Arc::new(StdMutex::new(SegmentData {
                    entries: Vec::new(),
                    status: SegmentStatus::InProgress,
                    truncation: TruncationStatus::None,
                    last_dlsn_override: None,
                }))
            })
            .clone()
    }

    pub fn append(&self, seg_seq_no: u64, payload: &str) {
        let seg = self.segment(seg_seq_no);
        let mut guard = seg.lock().unwrap();
        let entry_id = guard.entries.len() as i64;
        guard
            .entries
            .push(Entry::new(seg_seq_no, entry_id, payload.as_bytes().to_vec()));
    }

    pub fn seal(&self, seg_seq_no: u64) {
        let seg = self.segment(seg_seq_no);
        seg.lock().unwrap().status = SegmentStatus::Closed;
    }

    /// Mark a segment fully truncated, with no readable entries left. `last`
    /// is the segment's last coordinate before deletion, used only for
    /// admissibility checks.
    pub fn truncate_full(&self, seg_seq_no: u64, last: Dlsn) {
        let seg = self.segment(seg_seq_no);
        let mut guard = seg.lock().unwrap();
        guard.truncation = TruncationStatus::Full { last };
        guard.last_dlsn_override = Some(last);
        guard.status = SegmentStatus::Closed;
    }

    /// Mark a segment partially truncated: entries before `min_active` are
    /// gone, but the segment otherwise still serves its remaining entries.
    pub fn truncate_partial(&self, seg_seq_no: u64, min_active: Dlsn) {
        let seg = self.segment(seg_seq_no);
        seg.lock().unwrap().truncation = TruncationStatus::Partial { min_active };
    }

    pub fn last_dlsn(&self, seg_seq_no: u64) -> Option<Dlsn> {
        let seg = self.segment(seg_seq_no);
        let guard = seg.lock().unwrap();
        guard
            .last_dlsn_override
            .or_else(|| guard.entries.last().map(|e| e.dlsn()))
    }

    pub fn metadata(&self, seg_seq_no: u64) -> LogSegmentMetadata {
        let seg = self.segment(seg_seq_no);
        let guard = seg.lock().unwrap();
        let base = match guard.status {
            SegmentStatus::InProgress => LogSegmentMetadata::in_progress(seg_seq_no),
            SegmentStatus::Closed => LogSegmentMetadata::closed(
                seg_seq_no,
                guard
                    .last_dlsn_override
                    .or_else(|| guard.entries.last().map(|e| e.dlsn()))
                    .unwrap_or_else(|| Dlsn::at_entry(seg_seq_no, -1)),
            ),
        };
        base.with_truncation(guard.truncation)
    }

    /// Replace the live segment list a `FakeMetadataSource` built from this
    /// log reports on its next `read_log_segments` call.
    pub fn set_live_segments(&self, source: &FakeMetadataSource, seg_seq_nos: Vec<u64>) {
        *source.seg_seq_nos.lock().unwrap() = seg_seq_nos;
    }
}

struct FakeInner {
    data: Arc<StdMutex<SegmentData>>,
    cursor: AtomicUsize,
}

#[async_trait]
impl InnerEntryReader for FakeInner {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn read_next(&self, num_entries: usize) -> Result<Vec<Entry>> {
        loop {
            let (batch, status) = {
                let guard = self.data.lock().unwrap();
                let cursor = self.cursor.load(Ordering::SeqCst);
                let end = (cursor + num_entries).min(guard.entries.len());
                let batch: Vec<Entry> = guard.entries[cursor..end].to_vec();
                (batch, guard.status)
            };
            if !batch.is_empty() {
                self.cursor.fetch_add(batch.len(), Ordering::SeqCst);
                return Ok(batch);
            }
            if status == SegmentStatus::Closed {
                return Err(Error::EndOfLogSegment);
            }
            // Nothing new yet on an in-progress segment; back off briefly
            // rather than spinning the read-ahead loop against the lock.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn update_metadata(&self, _new: LogSegmentMetadata) -> Result<()> {
        Ok(())
    }

    fn register_listener(&self, _listener: Arc<dyn StateChangeListener>) {}

    async fn async_close(&self) -> Result<()> {
        Ok(())
    }

    fn is_beyond_last_add_confirmed(&self) -> bool {
        let guard = self.data.lock().unwrap();
        self.cursor.load(Ordering::SeqCst) >= guard.entries.len()
    }

    fn has_caught_up_on_inprogress(&self) -> bool {
        let guard = self.data.lock().unwrap();
        self.cursor.load(Ordering::SeqCst) >= guard.entries.len()
    }

    fn last_add_confirmed(&self) -> i64 {
        self.data.lock().unwrap().entries.len() as i64 - 1
    }

    fn segment(&self) -> LogSegmentMetadata {
        LogSegmentMetadata::in_progress(0)
    }
}

pub struct FakeEntrySource {
    log: FakeLog,
}

impl FakeEntrySource {
    pub fn new(log: FakeLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl EntrySource for FakeEntrySource {
    async fn open_reader(
        &self,
        segment: LogSegmentMetadata,
        start_entry_id: i64,
    ) -> Result<Arc<dyn InnerEntryReader>> {
        let data = self.log.segment(segment.seg_seq_no);
        Ok(Arc::new(FakeInner {
            data,
            cursor: AtomicUsize::new(start_entry_id.max(0) as usize),
        }))
    }
}

pub struct FakeMetadataSource {
    log: FakeLog,
    seg_seq_nos: StdMutex<Vec<u64>>,
}

impl FakeMetadataSource {
    pub fn new(log: FakeLog, seg_seq_nos: Vec<u64>) -> Self {
        Self {
            log,
            seg_seq_nos: StdMutex::new(seg_seq_nos),
        }
    }
}

#[async_trait]
impl MetadataSource for FakeMetadataSource {
    async fn read_log_segments(&self) -> Result<Vec<LogSegmentMetadata>> {
        let seg_seq_nos = self.seg_seq_nos.lock().unwrap().clone();
        Ok(seg_seq_nos.iter().map(|s| self.log.metadata(*s)).collect())
    }
}
