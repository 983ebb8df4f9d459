//! Segment translation table
//!
//! Maps `(segment id, unit)` to the backend handle of that unit's part of
//! the segment. Each segment id gets its own ordered map keyed by unit, so
//! lookups cost O(log U) and sparse registration stays cheap for large
//! teams. Handles are owned by the table: replacing or unregistering an
//! entry drops the previous handle exactly once.

use crate::types::{BackendSegment, SegmentId, UnitId};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// A unit's registration of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHandle {
    /// Segment id on the backend
    pub backend_segment: BackendSegment,
    /// Base address on the owning unit (informational for remote units)
    pub base: u64,
    /// Registered length in bytes
    pub len: usize,
}

impl SegmentHandle {
    pub const fn new(backend_segment: BackendSegment, base: u64, len: usize) -> Self {
        Self {
            backend_segment,
            base,
            len,
        }
    }
}

/// Registry of segment handles, one ordered map per segment id
pub struct SegmentTable<H = SegmentHandle> {
    segments: Mutex<BTreeMap<SegmentId, BTreeMap<UnitId, H>>>,
}

impl<H> Default for SegmentTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> SegmentTable<H> {
    pub fn new() -> Self {
        Self {
            segments: Mutex::new(BTreeMap::new()),
        }
    }

    /// Bind `handle` to `(segment, unit)`.
    ///
    /// An existing entry is replaced and its handle dropped; returns whether
    /// a replacement happened.
    pub fn register(&self, segment: SegmentId, unit: UnitId, handle: H) -> Result<bool> {
        let previous = self
            .segments
            .lock()?
            .entry(segment)
            .or_default()
            .insert(unit, handle);

        let replaced = previous.is_some();
        debug!(segment, unit, replaced, "segment registered");
        // Released after the lock is gone
        drop(previous);
        Ok(replaced)
    }

    /// Run `f` on the handle registered for `(segment, unit)`
    pub fn with_handle<R>(
        &self,
        unit: UnitId,
        segment: SegmentId,
        f: impl FnOnce(&H) -> R,
    ) -> Result<R> {
        let segments = self.segments.lock()?;
        segments
            .get(&segment)
            .and_then(|units| units.get(&unit))
            .map(f)
            .ok_or(Error::NotFound { unit, segment })
    }

    /// Drop every handle registered under `segment`, returning how many
    pub fn unregister_all(&self, segment: SegmentId) -> Result<usize> {
        let removed = self.segments.lock()?.remove(&segment);
        let count = removed.as_ref().map_or(0, BTreeMap::len);
        debug!(segment, count, "segment unregistered");
        drop(removed);
        Ok(count)
    }

    /// Number of units registered under `segment`
    pub fn units(&self, segment: SegmentId) -> Result<usize> {
        Ok(self.segments.lock()?.get(&segment).map_or(0, BTreeMap::len))
    }
}

impl<H: Clone> SegmentTable<H> {
    pub fn lookup(&self, unit: UnitId, segment: SegmentId) -> Result<H> {
        self.with_handle(unit, segment, H::clone)
    }
}
