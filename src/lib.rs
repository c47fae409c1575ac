//! readahead - read-ahead entry reader for an append-only distributed log
//!
//! Keeps one segment's worth of entries (and a peek into the next) buffered
//! ahead of the consumer, reconciling against metadata updates as segments
//! close and new ones are created, so `get_next_read_ahead_entry` returns
//! without blocking on the network in the common case.
//!
//! # Architecture
//!
//! A single [`reader::ReadAheadEntryReader`] owns one stream's worth of
//! state: a per-stream [`serializer::Serializer`] keeps every metadata
//! reconciliation and segment-advance decision strictly ordered, a bounded
//! [`cache::Cache`] holds prefetched entries with backpressure, and one
//! [`segment_reader::SegmentReader`] per segment tracks its own open/start/
//! close lifecycle against the [`store::EntrySource`] and
//! [`store::MetadataSource`] traits the host application implements.
//!
//! # Features
//!
//! - Bounded read-ahead with pause/resume backpressure
//! - Segment reconciliation against pushed or polled metadata updates
//! - Truncation-aware positioning (partial and full)
//! - Sticky first-writer-wins error latching
//! - Idle detection with on-demand metadata refresh
//! - A narrower [`record::RecordReader`] facade for consumers that just want
//!   `(Dlsn, Bytes)` pairs

pub mod cache;
pub mod config;
pub mod dlsn;
pub mod entry;
pub mod error;
pub mod metadata;
pub mod reader;
pub mod record;
pub mod segment_reader;
pub mod serializer;
pub mod store;

pub use config::ReadAheadConfig;
pub use error::{Error, Result};

/// Re-export of the commonly used types.
pub mod prelude {
    pub use crate::config::ReadAheadConfig;
    pub use crate::dlsn::{Dlsn, EntryPosition};
    pub use crate::entry::Entry;
    pub use crate::error::{Error, Result};
    pub use crate::metadata::{LogSegmentMetadata, SegmentStatus, TruncationStatus};
    pub use crate::reader::ReadAheadEntryReader;
    pub use crate::record::{Record, RecordReader};
    pub use crate::store::{EntrySource, InnerEntryReader, MetadataSource, StateChangeListener};
}
