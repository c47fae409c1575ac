//! Thin record-oriented facade over [`ReadAheadEntryReader`].
//!
//! Wraps the raw entry stream with the DLSN a caller expects to resume from,
//! exposing a single `read_next` rather than the reader's cache-inspection
//! surface. Mirrors the narrower consumer-facing API the teacher puts in
//! front of its broader internal handles.

use std::time::Duration;

use crate::dlsn::Dlsn;
use crate::error::Result;
use crate::reader::ReadAheadEntryReader;

/// A decoded record and the position it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub dlsn: Dlsn,
    pub payload: bytes::Bytes,
}

/// Consumer-facing wrapper around a [`ReadAheadEntryReader`].
#[derive(Clone)]
pub struct RecordReader {
    inner: ReadAheadEntryReader,
}

impl RecordReader {
    pub fn new(inner: ReadAheadEntryReader) -> Self {
        Self { inner }
    }

    /// Blocks up to `timeout` for the next record; `Ok(None)` means nothing
    /// arrived within the timeout, not end of stream.
    pub async fn read_next(&self, timeout: Duration) -> Result<Option<Record>> {
        let entry = self.inner.get_next_read_ahead_entry(timeout).await?;
        Ok(entry.map(|e| Record {
            dlsn: e.dlsn(),
            payload: e.payload,
        }))
    }

    pub async fn num_cached_records(&self) -> usize {
        self.inner.get_num_cached_entries().await
    }

    pub fn is_caught_up(&self) -> bool {
        self.inner.is_read_ahead_caught_up()
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
