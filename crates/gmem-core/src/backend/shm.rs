//! Shared-memory fabric
//!
//! Units are processes on one host. Segment `s` of unit `u` is the region
//! `{job}_u{u}_s{s}`; other units attach to it on first access and keep
//! the mapping until they delete their own segment with the same id.
//! Operations copy at post time and are counted against their queue until
//! drained.

use super::{copy_bytes, range_in, LocalSegment, OneSided, Region, RmaBackend};
use crate::config::ShmConfig;
use crate::shm::SharedMemory;
use crate::types::{BackendSegment, QueueId, UnitId};
use crate::{Error, Result};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Header of the job-wide barrier region
#[repr(C)]
struct BarrierHeader {
    arrived: AtomicU32,
    generation: AtomicU32,
}

enum LocalRegion {
    Shared(SharedMemory),
    Bound(Region),
}

impl LocalRegion {
    fn base_len(&self) -> (*mut u8, usize) {
        match self {
            LocalRegion::Shared(shm) => (shm.as_mut_ptr(), shm.size()),
            LocalRegion::Bound(region) => {
                let seg = region.local();
                (seg.ptr.as_ptr(), seg.len)
            }
        }
    }
}

/// Backend of one process in a shared-memory job
pub struct ShmBackend {
    config: ShmConfig,
    unit: UnitId,
    units: usize,
    local: Mutex<HashMap<BackendSegment, LocalRegion>>,
    attached: Mutex<HashMap<(UnitId, BackendSegment), SharedMemory>>,
    queues: Vec<AtomicUsize>,
    barrier: SharedMemory,
}

impl ShmBackend {
    /// Join job `config.job` as `unit` of `units`
    pub fn new(config: ShmConfig, unit: UnitId, units: usize) -> Result<Self> {
        if unit as usize >= units {
            return Err(Error::InvalidArgument(format!(
                "unit {unit} outside job of {units} units"
            )));
        }
        let barrier = SharedMemory::create_or_open(
            &format!("{}_barrier", config.job),
            std::mem::size_of::<BarrierHeader>(),
        )?;
        let queues = (0..config.queue_num.max(1))
            .map(|_| AtomicUsize::new(0))
            .collect();
        debug!(unit, units, job = %config.job, "joined shared-memory fabric");

        Ok(Self {
            config,
            unit,
            units,
            local: Mutex::new(HashMap::new()),
            attached: Mutex::new(HashMap::new()),
            queues,
            barrier,
        })
    }

    fn region_name(&self, unit: UnitId, segment: BackendSegment) -> String {
        format!("{}_u{}_s{}", self.config.job, unit, segment)
    }

    fn barrier_header(&self) -> &BarrierHeader {
        // Safety: the region is at least one header long, zero-initialised by
        // the OS and only accessed through atomics
        unsafe { &*(self.barrier.as_ptr() as *const BarrierHeader) }
    }

    fn enqueue(&self, queue: QueueId) -> Result<()> {
        let slot = self
            .queues
            .get(queue)
            .ok_or_else(|| Error::Backend(format!("no queue {queue}")))?;
        let depth = self.config.queue_depth.max(1);
        slot.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < depth).then_some(n + 1))
            .map(|_| ())
            .map_err(|_| Error::QueueFull(queue))
    }

    fn transfer(&self, op: &OneSided, remote_to_local: bool) -> Result<()> {
        if op.remote_unit as usize >= self.units {
            return Err(Error::Backend(format!("unit {} outside job", op.remote_unit)));
        }
        let local = self.local.lock()?;
        let (base, size) = local
            .get(&op.local_segment)
            .ok_or_else(|| Error::Backend(format!("local segment {} not present", op.local_segment)))?
            .base_len();
        let local_ptr = range_in(base, size, op.local_offset, op.len)?;

        let remote_ptr = if op.remote_unit == self.unit {
            let (base, size) = local
                .get(&op.remote_segment)
                .ok_or_else(|| Error::Backend(format!("segment {} not present", op.remote_segment)))?
                .base_len();
            range_in(base, size, op.remote_offset, op.len)?
        } else {
            let mut attached = self.attached.lock()?;
            let key = (op.remote_unit, op.remote_segment);
            if !attached.contains_key(&key) {
                let shm = SharedMemory::open(&self.region_name(op.remote_unit, op.remote_segment))
                    .map_err(|e| Error::Backend(e.to_string()))?;
                debug!(unit = op.remote_unit, segment = op.remote_segment, "attached remote segment");
                attached.insert(key, shm);
            }
            let shm = &attached[&key];
            range_in(shm.as_mut_ptr(), shm.size(), op.remote_offset, op.len)?
        };
        self.enqueue(op.queue)?;

        let (src, dst) = if remote_to_local {
            (remote_ptr, local_ptr)
        } else {
            (local_ptr, remote_ptr)
        };
        // Safety: both ranges are bounds-checked and their mappings are kept
        // alive by the held locks
        unsafe { copy_bytes(src, dst, op.len) };
        Ok(())
    }
}

// Safety: all mutable state is behind mutexes or atomics and the mappings
// are process-wide
unsafe impl Send for ShmBackend {}
unsafe impl Sync for ShmBackend {}

impl RmaBackend for ShmBackend {
    fn my_unit(&self) -> UnitId {
        self.unit
    }

    fn num_units(&self) -> usize {
        self.units
    }

    fn segment_create(&self, segment: BackendSegment, size: usize) -> Result<()> {
        let mut local = self.local.lock()?;
        if local.contains_key(&segment) {
            return Err(Error::Backend(format!("segment {segment} already exists")));
        }
        let shm = SharedMemory::create(&self.region_name(self.unit, segment), size)
            .map_err(|e| Error::Backend(e.to_string()))?;
        local.insert(segment, LocalRegion::Shared(shm));
        Ok(())
    }

    fn segment_delete(&self, segment: BackendSegment) -> Result<()> {
        let removed = self.local.lock()?.remove(&segment);
        self.attached.lock()?.retain(|(_, s), _| *s != segment);
        removed
            .map(drop)
            .ok_or_else(|| Error::Backend(format!("segment {segment} not present")))
    }

    unsafe fn segment_bind(
        &self,
        segment: BackendSegment,
        ptr: NonNull<u8>,
        len: usize,
    ) -> Result<()> {
        let mut local = self.local.lock()?;
        if local.contains_key(&segment) {
            return Err(Error::Backend(format!("segment {segment} already bound")));
        }
        local.insert(segment, LocalRegion::Bound(Region::borrowed(ptr, len)));
        Ok(())
    }

    fn segment_ptr(&self, segment: BackendSegment) -> Result<LocalSegment> {
        let local = self.local.lock()?;
        let (base, len) = local
            .get(&segment)
            .ok_or_else(|| Error::Backend(format!("segment {segment} not present")))?
            .base_len();
        let ptr = NonNull::new(base)
            .ok_or_else(|| Error::Backend(format!("segment {segment} has no mapping")))?;
        Ok(LocalSegment { ptr, len })
    }

    fn read(&self, op: &OneSided) -> Result<()> {
        self.transfer(op, true)
    }

    fn write(&self, op: &OneSided) -> Result<()> {
        self.transfer(op, false)
    }

    fn queue_num(&self) -> usize {
        self.queues.len()
    }

    fn queue_size_max(&self) -> usize {
        self.config.queue_depth.max(1)
    }

    fn queue_size(&self, queue: QueueId) -> Result<usize> {
        self.queues
            .get(queue)
            .map(|q| q.load(Ordering::SeqCst))
            .ok_or_else(|| Error::Backend(format!("no queue {queue}")))
    }

    fn wait(&self, queue: QueueId) -> Result<()> {
        self.queues
            .get(queue)
            .map(|q| q.store(0, Ordering::SeqCst))
            .ok_or_else(|| Error::Backend(format!("no queue {queue}")))
    }

    fn barrier(&self) -> Result<()> {
        let header = self.barrier_header();
        let generation = header.generation.load(Ordering::Acquire);
        let arrived = header.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        if arrived as usize == self.units {
            header.arrived.store(0, Ordering::Relaxed);
            header.generation.fetch_add(1, Ordering::Release);
            return Ok(());
        }

        let started = Instant::now();
        while header.generation.load(Ordering::Acquire) == generation {
            if started.elapsed() > self.config.barrier_timeout {
                return Err(Error::Backend(format!(
                    "barrier timed out after {:?} ({} of {} units arrived)",
                    self.config.barrier_timeout,
                    header.arrived.load(Ordering::Relaxed),
                    self.units
                )));
            }
            std::thread::yield_now();
        }
        Ok(())
    }
}
