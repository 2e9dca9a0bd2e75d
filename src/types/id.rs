//! Identifier types for engine entities.
//!
//! These newtypes keep thread, monitor, and object identities from being
//! mixed up in the engine's bookkeeping tables. All of them are cheap `Copy`
//! values and hash deterministically.

use crate::util::det_hash64;
use core::fmt;
use serde::{Deserialize, Serialize};

/// A unique identifier for a logical thread within one trial.
///
/// Logical thread ids are allocated densely starting at zero; the root
/// thread of a trial is always `T0`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub(crate) u32);

impl ThreadId {
    /// Creates a thread id from a raw index.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index of this thread id.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A unique identifier for an emulated monitor.
///
/// Monitors stand in for the lockable objects of the program under test.
/// Tests usually create them from a stable label via [`MonitorId::named`],
/// so failure reports (for example a resource-deadlock cycle) can be
/// compared against known monitors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorId(pub(crate) u64);

impl MonitorId {
    /// Creates a monitor id from a raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Derives a monitor id from a stable label.
    ///
    /// The same label always maps to the same id, across runs and builds.
    #[must_use]
    pub fn named(label: &str) -> Self {
        Self(det_hash64(&label))
    }

    /// Returns the raw value of this monitor id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MonitorId({:#x})", self.0)
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{:x}", self.0)
    }
}

/// The identity of a shared object observed by the race detector.
///
/// The engine never dereferences object identities; they are opaque keys
/// chosen by the program under test (an address, an index, a label hash).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub(crate) u64);

impl ObjectId {
    /// Creates an object id from a raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Derives an object id from a stable label.
    #[must_use]
    pub fn named(label: &str) -> Self {
        Self(det_hash64(&label))
    }

    /// Returns the raw value of this object id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:#x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_display_and_debug() {
        let id = ThreadId::from_index(7);
        assert_eq!(format!("{id}"), "T7");
        assert_eq!(format!("{id:?}"), "ThreadId(7)");
        assert_eq!(id.index(), 7);
    }

    #[test]
    fn thread_id_ordering() {
        assert!(ThreadId::from_index(1) < ThreadId::from_index(2));
    }

    #[test]
    fn monitor_id_named_is_stable() {
        let a = MonitorId::named("A");
        let b = MonitorId::named("A");
        assert_eq!(a, b);
        assert_ne!(a, MonitorId::named("B"));
    }

    #[test]
    fn monitor_id_raw_round_trip() {
        let id = MonitorId::from_raw(0x2a);
        assert_eq!(id.raw(), 0x2a);
        assert_eq!(format!("{id}"), "M2a");
    }

    #[test]
    fn object_id_named_is_stable() {
        assert_eq!(ObjectId::named("counter"), ObjectId::named("counter"));
        assert_ne!(ObjectId::named("counter"), ObjectId::named("flag"));
    }

    #[test]
    fn id_serde_round_trips() {
        let t = ThreadId::from_index(3);
        let json = serde_json::to_string(&t).expect("serialize");
        let back: ThreadId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(t, back);

        let m = MonitorId::from_raw(99);
        let json = serde_json::to_string(&m).expect("serialize");
        let back: MonitorId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(m, back);
    }

    #[test]
    fn id_hash_consistency() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let a = ObjectId::from_raw(5);
        let b = ObjectId::from_raw(5);
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }
}
