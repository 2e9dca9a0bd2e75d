//! Read/write race detection.
//!
//! The detector tracks, per `(object, field)` key, how many threads are
//! inside a read or write access region. Overlap with a writer sets a
//! sticky flag on the record; the access that *ends* while the flag is set
//! reports the race. Records are dropped once both counts return to zero,
//! so the table only ever holds in-flight accesses.
//!
//! Begin/end access hooks are yield points: the scheduler is free to
//! interleave other threads between them, which is exactly what makes the
//! overlap observable under exploration.

use crate::types::ObjectId;
use core::fmt;
use serde::Serialize;

use crate::util::DetHashMap;

/// Identity of one shared memory slot: an object plus a field or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AccessKey {
    /// The object owning the slot.
    pub object: ObjectId,
    /// Field name or element index label within the object.
    pub field: &'static str,
}

impl AccessKey {
    /// Creates an access key.
    #[must_use]
    pub const fn new(object: ObjectId, field: &'static str) -> Self {
        Self { object, field }
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.field)
    }
}

/// A detected unsynchronized overlap on one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RaceHit {
    /// The slot that raced.
    pub key: AccessKey,
    /// Reader count at the moment the race was reported.
    pub readers: u32,
    /// Writer count at the moment the race was reported.
    pub writers: u32,
}

impl fmt::Display for RaceHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsynchronized access to {} ({} readers, {} writers in flight)",
            self.key, self.readers, self.writers
        )
    }
}

#[derive(Debug, Default)]
struct AccessRecord {
    readers: u32,
    writers: u32,
    racy: bool,
}

/// Access-state table for the race detector.
#[derive(Debug)]
pub(crate) struct RaceTable {
    records: DetHashMap<AccessKey, AccessRecord>,
    enabled: bool,
}

impl RaceTable {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            records: DetHashMap::default(),
            enabled,
        }
    }

    #[cfg(test)]
    pub(crate) const fn enabled(&self) -> bool {
        self.enabled
    }

    /// A thread enters a read region on `key`.
    pub(crate) fn begin_read(&mut self, key: AccessKey) {
        if !self.enabled {
            return;
        }
        let record = self.records.entry(key).or_default();
        record.readers += 1;
        if record.writers > 0 {
            record.racy = true;
        }
    }

    /// A thread enters a write region on `key`.
    pub(crate) fn begin_write(&mut self, key: AccessKey) {
        if !self.enabled {
            return;
        }
        let record = self.records.entry(key).or_default();
        if record.writers > 0 || record.readers > 0 {
            record.racy = true;
        }
        record.writers += 1;
    }

    /// A thread leaves a read region; reports the race if one was flagged.
    pub(crate) fn end_read(&mut self, key: AccessKey) -> Option<RaceHit> {
        self.end_access(key, false)
    }

    /// A thread leaves a write region; reports the race if one was flagged.
    pub(crate) fn end_write(&mut self, key: AccessKey) -> Option<RaceHit> {
        self.end_access(key, true)
    }

    fn end_access(&mut self, key: AccessKey, write: bool) -> Option<RaceHit> {
        if !self.enabled {
            return None;
        }
        let record = self.records.get_mut(&key)?;
        if write {
            record.writers = record.writers.saturating_sub(1);
        } else {
            record.readers = record.readers.saturating_sub(1);
        }
        let hit = record.racy.then_some(RaceHit {
            key,
            readers: record.readers,
            writers: record.writers,
        });
        if record.readers == 0 && record.writers == 0 {
            self.records.remove(&key);
        }
        hit
    }

    /// Number of in-flight access records (test observability).
    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.records.len()
    }
}
