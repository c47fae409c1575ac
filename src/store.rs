//! Trait boundary to the external collaborators named in the design: the
//! segment entry store and the metadata source. Neither is implemented by
//! this crate; both are consumed as `async_trait` objects so the read-ahead
//! core can be exercised against an in-memory double.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::Entry;
use crate::error::Result;
use crate::metadata::LogSegmentMetadata;

/// Opens readers over individual segments.
#[async_trait]
pub trait EntrySource: Send + Sync {
    async fn open_reader(
        &self,
        segment: LogSegmentMetadata,
        start_entry_id: i64,
    ) -> Result<Arc<dyn InnerEntryReader>>;
}

/// A reader positioned over a single segment.
#[async_trait]
pub trait InnerEntryReader: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Read up to `num_entries` entries. Returns `Err(Error::EndOfLogSegment)`
    /// once the segment has no more readable entries.
    async fn read_next(&self, num_entries: usize) -> Result<Vec<Entry>>;

    async fn update_metadata(&self, new: LogSegmentMetadata) -> Result<()>;

    fn register_listener(&self, listener: Arc<dyn StateChangeListener>);

    async fn async_close(&self) -> Result<()>;

    fn is_beyond_last_add_confirmed(&self) -> bool;

    fn has_caught_up_on_inprogress(&self) -> bool;

    fn last_add_confirmed(&self) -> i64;

    fn segment(&self) -> LogSegmentMetadata;
}

/// Callback interface an `InnerEntryReader` uses to push LAC-caught-up
/// notifications back to its owning `SegmentReader`.
pub trait StateChangeListener: Send + Sync {
    fn on_caught_up_on_inprogress(&self);
}

/// Resolves the current segment list; consumed by the idle detector for
/// on-demand refreshes. Push updates (`onSegmentsUpdated`/`onLogStreamDeleted`)
/// are delivered directly to `ReadAheadEntryReader`, not through this trait.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn read_log_segments(&self) -> Result<Vec<LogSegmentMetadata>>;
}
