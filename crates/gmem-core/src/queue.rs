//! Transfer queue selection
//!
//! New work goes to an idle queue if there is one, otherwise to the least
//! occupied queue; if even that one is full the caller blocks until it is
//! drained. The queue last used toward a unit is cached per segment so
//! consecutive operations to the same unit share a queue and stay ordered.

use crate::backend::RmaBackend;
use crate::types::{QueueId, SegmentId, UnitId};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Pick a queue for new work, blocking while every queue is saturated
pub fn select_queue<B: RmaBackend + ?Sized>(backend: &B) -> Result<QueueId> {
    let num = backend.queue_num();
    if num == 0 {
        return Err(Error::backend("backend exposes no transfer queues"));
    }
    let max = backend.queue_size_max();

    let mut best = 0;
    let mut best_size = usize::MAX;
    for queue in 0..num {
        let size = backend.queue_size(queue)?;
        if size == 0 {
            return Ok(queue);
        }
        if size < best_size {
            best = queue;
            best_size = size;
        }
    }

    if best_size >= max {
        debug!(queue = best, occupancy = best_size, "all queues saturated, draining");
        backend.wait(best)?;
    }
    Ok(best)
}

/// Per-segment cache of the queue last used toward each unit
#[derive(Default)]
pub struct QueueManager {
    cache: Mutex<BTreeMap<SegmentId, BTreeMap<UnitId, QueueId>>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached queue toward `unit` for `segment`
    pub fn find(&self, unit: UnitId, segment: SegmentId) -> Result<Option<QueueId>> {
        Ok(self
            .cache
            .lock()?
            .get(&segment)
            .and_then(|units| units.get(&unit))
            .copied())
    }

    /// Remember `queue` for `(unit, segment)`, returning the queue it replaces
    pub fn insert_or_replace(
        &self,
        unit: UnitId,
        segment: SegmentId,
        queue: QueueId,
    ) -> Result<Option<QueueId>> {
        Ok(self
            .cache
            .lock()?
            .entry(segment)
            .or_default()
            .insert(unit, queue))
    }

    /// Forget every cached queue of `segment`
    pub fn delete_all(&self, segment: SegmentId) -> Result<usize> {
        Ok(self
            .cache
            .lock()?
            .remove(&segment)
            .map_or(0, |units| units.len()))
    }

    /// `(unit, queue)` pairs cached for `segment`, in unit order
    pub fn entries(&self, segment: SegmentId) -> Result<Vec<(UnitId, QueueId)>> {
        Ok(self
            .cache
            .lock()?
            .get(&segment)
            .map(|units| units.iter().map(|(u, q)| (*u, *q)).collect())
            .unwrap_or_default())
    }

    /// Distinct queues cached for `segment`, ascending
    pub fn queues(&self, segment: SegmentId) -> Result<Vec<QueueId>> {
        let mut queues: Vec<_> = self.entries(segment)?.into_iter().map(|(_, q)| q).collect();
        queues.sort_unstable();
        queues.dedup();
        Ok(queues)
    }

    /// Queue for the next operation toward `(unit, segment)`.
    ///
    /// A cached queue is reused, after draining it if it is full. On a miss
    /// [`select_queue`] picks one and the choice is cached.
    pub fn acquire<B: RmaBackend + ?Sized>(
        &self,
        backend: &B,
        unit: UnitId,
        segment: SegmentId,
    ) -> Result<QueueId> {
        if let Some(queue) = self.find(unit, segment)? {
            if backend.queue_size(queue)? >= backend.queue_size_max() {
                debug!(unit, segment, queue, "cached queue saturated, draining");
                backend.wait(queue)?;
            }
            return Ok(queue);
        }

        let queue = select_queue(backend)?;
        debug!(unit, segment, queue, "queue assigned");
        self.insert_or_replace(unit, segment, queue)?;
        Ok(queue)
    }
}
