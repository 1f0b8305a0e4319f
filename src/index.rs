//! Timestamp to byte offset index

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::record::Timestamp;

/// Offsets of every in-window record, keyed by record time
///
/// `scan_starts` is always a subset of `by_timestamp` holding the same
/// offsets. When two records share a timestamp the later one wins, and its
/// scan flag decides whether the timestamp stays in `scan_starts`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeIndex {
    by_timestamp: BTreeMap<Timestamp, u64>,
    scan_starts: BTreeMap<Timestamp, u64>,
    offsets: BTreeSet<u64>,
}

impl TimeIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record located at `offset`
    pub fn insert(&mut self, time: Timestamp, offset: u64, scan_start: bool) {
        if let Some(previous) = self.by_timestamp.insert(time, offset) {
            warn!(
                "Duplicate record time {}: offset {} replaces {}",
                time, offset, previous
            );
            self.offsets.remove(&previous);
        }
        self.offsets.insert(offset);

        if scan_start {
            self.scan_starts.insert(time, offset);
        } else {
            self.scan_starts.remove(&time);
        }
    }

    /// All indexed records
    #[must_use]
    pub fn by_timestamp(&self) -> &BTreeMap<Timestamp, u64> {
        &self.by_timestamp
    }

    /// Records that start a scan
    #[must_use]
    pub fn scan_starts(&self) -> &BTreeMap<Timestamp, u64> {
        &self.scan_starts
    }

    /// Number of indexed records
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_timestamp.len()
    }

    /// Whether no record was indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_timestamp.is_empty()
    }

    /// Number of indexed scan starts
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scan_starts.len()
    }

    /// Whether `offset` is the start of an indexed record
    #[must_use]
    pub fn contains_offset(&self, offset: u64) -> bool {
        self.offsets.contains(&offset)
    }

    /// Offset of the record stamped exactly `time`
    #[must_use]
    pub fn offset_of(&self, time: Timestamp) -> Option<u64> {
        self.by_timestamp.get(&time).copied()
    }

    /// First record at or after `time`
    #[must_use]
    pub fn first_at_or_after(&self, time: Timestamp) -> Option<(Timestamp, u64)> {
        self.by_timestamp
            .range(time..)
            .next()
            .map(|(&t, &offset)| (t, offset))
    }

    /// Start of the scan containing `time`: the last scan start at or before it
    #[must_use]
    pub fn scan_start_for(&self, time: Timestamp) -> Option<(Timestamp, u64)> {
        self.scan_starts
            .range(..=time)
            .next_back()
            .map(|(&t, &offset)| (t, offset))
    }
}
