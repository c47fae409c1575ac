//! Log coordinates.

use std::fmt;

/// Totally ordered log coordinate `(segSeqNo, entryId, slotId)`.
///
/// Only `seg_seq_no` and `entry_id` are used by the read-ahead core; `slot_id`
/// is carried for ordering parity with entry-store implementations that split
/// a single `readNext` batch entry into multiple logical records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dlsn {
    pub seg_seq_no: u64,
    pub entry_id: i64,
    pub slot_id: i64,
}

impl Dlsn {
    pub fn new(seg_seq_no: u64, entry_id: i64, slot_id: i64) -> Self {
        Self {
            seg_seq_no,
            entry_id,
            slot_id,
        }
    }

    /// Coordinate at the start of an entry, ignoring slot.
    pub fn at_entry(seg_seq_no: u64, entry_id: i64) -> Self {
        Self::new(seg_seq_no, entry_id, 0)
    }
}

impl fmt::Display for Dlsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.seg_seq_no, self.entry_id, self.slot_id)
    }
}

/// Mutable read cursor `(segSeqNo, entryId)`. Monotonic non-decreasing across
/// the reader's life; advanced to `(lastEntry.seg_seq_no, lastEntry.entry_id + 1)`
/// after every delivered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryPosition {
    pub seg_seq_no: u64,
    pub entry_id: i64,
}

impl EntryPosition {
    pub fn new(seg_seq_no: u64, entry_id: i64) -> Self {
        Self {
            seg_seq_no,
            entry_id,
        }
    }

    pub fn from_dlsn(dlsn: Dlsn) -> Self {
        Self::new(dlsn.seg_seq_no, dlsn.entry_id)
    }
}

impl fmt::Display for EntryPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.seg_seq_no, self.entry_id)
    }
}
