//! In-process fabric
//!
//! Every unit is a [`MemBackend`] endpoint sharing one segment store.
//! Operations copy immediately but stay counted against their queue until
//! the queue is drained with [`RmaBackend::wait`], which mirrors the
//! occupancy a hardware queue reports.

use super::{copy_bytes, LocalSegment, OneSided, Region, RmaBackend};
use crate::types::{BackendSegment, QueueId, UnitId};
use crate::{Error, Result};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

/// Default number of transfer queues per unit
pub const DEFAULT_QUEUE_NUM: usize = 8;

/// Default queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

struct Shared {
    units: usize,
    queue_num: usize,
    queue_depth: usize,
    segments: Mutex<HashMap<(UnitId, BackendSegment), Region>>,
    barrier: Barrier,
}

/// A set of units living in one process
#[derive(Clone)]
pub struct MemFabric {
    shared: Arc<Shared>,
}

impl MemFabric {
    pub fn new(units: usize) -> Self {
        Self::with_queues(units, DEFAULT_QUEUE_NUM, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queues(units: usize, queue_num: usize, queue_depth: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                units,
                queue_num: queue_num.max(1),
                queue_depth: queue_depth.max(1),
                segments: Mutex::new(HashMap::new()),
                barrier: Barrier::new(units.max(1)),
            }),
        }
    }

    /// Backend for `unit`
    pub fn endpoint(&self, unit: UnitId) -> MemBackend {
        MemBackend {
            unit,
            shared: Arc::clone(&self.shared),
            queues: (0..self.shared.queue_num)
                .map(|_| AtomicUsize::new(0))
                .collect(),
            stats: Stats::default(),
        }
    }

    /// One backend per unit, indexed by unit id
    pub fn endpoints(&self) -> Vec<MemBackend> {
        (0..self.shared.units as UnitId)
            .map(|unit| self.endpoint(unit))
            .collect()
    }
}

#[derive(Default)]
struct Stats {
    reads: AtomicUsize,
    writes: AtomicUsize,
    binds: AtomicUsize,
    waits: AtomicUsize,
}

/// Counters of network-facing calls made on one endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub reads: usize,
    pub writes: usize,
    pub binds: usize,
    pub waits: usize,
}

impl OpStats {
    /// Calls that would have touched the network
    pub fn network_calls(&self) -> usize {
        self.reads + self.writes + self.binds
    }
}

/// One unit's view of a [`MemFabric`]
pub struct MemBackend {
    unit: UnitId,
    shared: Arc<Shared>,
    queues: Vec<AtomicUsize>,
    stats: Stats,
}

impl MemBackend {
    pub fn stats(&self) -> OpStats {
        OpStats {
            reads: self.stats.reads.load(Ordering::SeqCst),
            writes: self.stats.writes.load(Ordering::SeqCst),
            binds: self.stats.binds.load(Ordering::SeqCst),
            waits: self.stats.waits.load(Ordering::SeqCst),
        }
    }

    fn check_unit(&self, unit: UnitId) -> Result<()> {
        if (unit as usize) < self.shared.units {
            Ok(())
        } else {
            Err(Error::Backend(format!(
                "unit {unit} outside fabric of {} units",
                self.shared.units
            )))
        }
    }

    fn enqueue(&self, queue: QueueId) -> Result<()> {
        let slot = self
            .queues
            .get(queue)
            .ok_or_else(|| Error::Backend(format!("no queue {queue}")))?;
        let depth = self.shared.queue_depth;
        slot.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < depth).then_some(n + 1))
            .map(|_| ())
            .map_err(|_| Error::QueueFull(queue))
    }

    /// Copy `len` bytes between two registered ranges under the store lock
    fn transfer(&self, op: &OneSided, remote_to_local: bool) -> Result<()> {
        self.check_unit(op.remote_unit)?;
        let segments = self.shared.segments.lock()?;
        let local = segments
            .get(&(self.unit, op.local_segment))
            .ok_or_else(|| Error::Backend(format!("local segment {} not present", op.local_segment)))?
            .range(op.local_offset, op.len)?;
        let remote = segments
            .get(&(op.remote_unit, op.remote_segment))
            .ok_or_else(|| {
                Error::Backend(format!(
                    "segment {} not present on unit {}",
                    op.remote_segment, op.remote_unit
                ))
            })?
            .range(op.remote_offset, op.len)?;
        self.enqueue(op.queue)?;

        let (src, dst) = if remote_to_local {
            (remote, local)
        } else {
            (local, remote)
        };
        // Safety: both ranges were bounds-checked against live regions and
        // the store lock keeps them alive for the copy
        unsafe { copy_bytes(src, dst, op.len) };
        Ok(())
    }
}

impl RmaBackend for MemBackend {
    fn my_unit(&self) -> UnitId {
        self.unit
    }

    fn num_units(&self) -> usize {
        self.shared.units
    }

    fn segment_create(&self, segment: BackendSegment, size: usize) -> Result<()> {
        let mut segments = self.shared.segments.lock()?;
        if segments.contains_key(&(self.unit, segment)) {
            return Err(Error::Backend(format!(
                "segment {segment} already exists on unit {}",
                self.unit
            )));
        }
        segments.insert((self.unit, segment), Region::alloc(size));
        Ok(())
    }

    fn segment_delete(&self, segment: BackendSegment) -> Result<()> {
        self.shared
            .segments
            .lock()?
            .remove(&(self.unit, segment))
            .map(drop)
            .ok_or_else(|| Error::Backend(format!("segment {segment} not present")))
    }

    unsafe fn segment_bind(
        &self,
        segment: BackendSegment,
        ptr: NonNull<u8>,
        len: usize,
    ) -> Result<()> {
        self.stats.binds.fetch_add(1, Ordering::SeqCst);
        let mut segments = self.shared.segments.lock()?;
        if segments.contains_key(&(self.unit, segment)) {
            return Err(Error::Backend(format!("segment {segment} already bound")));
        }
        segments.insert((self.unit, segment), Region::borrowed(ptr, len));
        Ok(())
    }

    fn segment_ptr(&self, segment: BackendSegment) -> Result<LocalSegment> {
        self.shared
            .segments
            .lock()?
            .get(&(self.unit, segment))
            .map(Region::local)
            .ok_or_else(|| Error::Backend(format!("segment {segment} not present")))
    }

    fn read(&self, op: &OneSided) -> Result<()> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        self.transfer(op, true)
    }

    fn write(&self, op: &OneSided) -> Result<()> {
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        self.transfer(op, false)
    }

    fn queue_num(&self) -> usize {
        self.queues.len()
    }

    fn queue_size_max(&self) -> usize {
        self.shared.queue_depth
    }

    fn queue_size(&self, queue: QueueId) -> Result<usize> {
        self.queues
            .get(queue)
            .map(|q| q.load(Ordering::SeqCst))
            .ok_or_else(|| Error::Backend(format!("no queue {queue}")))
    }

    fn wait(&self, queue: QueueId) -> Result<()> {
        self.stats.waits.fetch_add(1, Ordering::SeqCst);
        self.queues
            .get(queue)
            .map(|q| q.store(0, Ordering::SeqCst))
            .ok_or_else(|| Error::Backend(format!("no queue {queue}")))
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }
}
