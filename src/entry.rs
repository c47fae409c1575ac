//! Readable entries delivered to the consumer.

use bytes::Bytes;

use crate::dlsn::Dlsn;

/// One readable unit produced by a segment's inner reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub seg_seq_no: u64,
    pub entry_id: i64,
    pub payload: Bytes,
}

impl Entry {
    pub fn new(seg_seq_no: u64, entry_id: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            seg_seq_no,
            entry_id,
            payload: payload.into(),
        }
    }

    pub fn dlsn(&self) -> Dlsn {
        Dlsn::at_entry(self.seg_seq_no, self.entry_id)
    }
}
