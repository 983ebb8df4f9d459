//! Network backend interface
//!
//! The executor only talks to the network through [`RmaBackend`]: segment
//! management, one-sided read/write on numbered transfer queues, queue
//! occupancy and drain, and a barrier. Two implementations ship with the
//! crate: [`mem::MemFabric`] runs several units inside one process and
//! [`shm::ShmBackend`] connects processes through POSIX shared memory.

pub mod mem;
pub mod shm;

use crate::types::{BackendSegment, QueueId, UnitId};
use crate::{Error, Result};
use std::ptr::NonNull;

/// One one-sided operation.
///
/// For a read, bytes flow from `(remote_unit, remote_segment,
/// remote_offset)` into `(local_segment, local_offset)`; a write moves them
/// the other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneSided {
    pub local_segment: BackendSegment,
    pub local_offset: usize,
    pub remote_unit: UnitId,
    pub remote_segment: BackendSegment,
    pub remote_offset: usize,
    pub len: usize,
    pub queue: QueueId,
}

/// Base address and length of a segment on the calling unit
#[derive(Debug, Clone, Copy)]
pub struct LocalSegment {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

/// One-sided communication backend of a single unit
pub trait RmaBackend: Send + Sync {
    /// Process-global id of the calling unit
    fn my_unit(&self) -> UnitId;

    fn num_units(&self) -> usize;

    /// Allocate `size` bytes as `segment`, visible to remote units
    fn segment_create(&self, segment: BackendSegment, size: usize) -> Result<()>;

    /// Release a created or bound segment
    fn segment_delete(&self, segment: BackendSegment) -> Result<()>;

    /// Make caller memory usable as the local side of one-sided operations.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + len` must stay valid, and must not be accessed through
    /// other references while operations on `segment` are outstanding,
    /// until `segment_delete(segment)` returns.
    unsafe fn segment_bind(&self, segment: BackendSegment, ptr: NonNull<u8>, len: usize)
        -> Result<()>;

    /// Address of a segment that lives on the calling unit
    fn segment_ptr(&self, segment: BackendSegment) -> Result<LocalSegment>;

    /// Post a one-sided read.
    ///
    /// Fails with [`Error::QueueFull`](crate::Error::QueueFull), posting
    /// nothing, while `op.queue` is at capacity.
    fn read(&self, op: &OneSided) -> Result<()>;

    /// Post a one-sided write
    fn write(&self, op: &OneSided) -> Result<()>;

    /// Number of transfer queues
    fn queue_num(&self) -> usize;

    /// Operations a queue holds before it must be drained
    fn queue_size_max(&self) -> usize;

    /// Operations currently outstanding on `queue`
    fn queue_size(&self, queue: QueueId) -> Result<usize>;

    /// Block until every operation posted to `queue` has completed
    fn wait(&self, queue: QueueId) -> Result<()>;

    /// Block until every unit has entered the barrier
    fn barrier(&self) -> Result<()>;
}

/// Raw byte range owned by a backend or borrowed from a caller
pub(crate) struct Region {
    ptr: NonNull<u8>,
    len: usize,
    owned: bool,
}

// Safety: a Region is only a pointer/length pair; every access goes through
// raw copies whose exclusivity is the caller's contract (see segment_bind).
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Zeroed heap allocation owned by the region
    pub(crate) fn alloc(len: usize) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(boxed) as *mut u8;
        Self {
            // Box never hands out null, even for len == 0
            ptr: NonNull::new(raw).unwrap_or(NonNull::dangling()),
            len,
            owned: true,
        }
    }

    /// # Safety
    ///
    /// See [`RmaBackend::segment_bind`].
    pub(crate) unsafe fn borrowed(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            owned: false,
        }
    }

    pub(crate) fn local(&self) -> LocalSegment {
        LocalSegment {
            ptr: self.ptr,
            len: self.len,
        }
    }

    /// Pointer to `offset`, checking that `len` bytes fit
    pub(crate) fn range(&self, offset: usize, len: usize) -> Result<*mut u8> {
        range_in(self.ptr.as_ptr(), self.len, offset, len)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.owned {
            let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
            // Safety: produced by Box::into_raw in `alloc` with this length
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}

pub(crate) fn range_in(base: *mut u8, size: usize, offset: usize, len: usize) -> Result<*mut u8> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(base.wrapping_add(offset)),
        _ => Err(Error::Backend(format!(
            "access of {len}B at offset {offset} outside segment of {size}B"
        ))),
    }
}

/// Copy between two checked ranges that may overlap
///
/// # Safety
///
/// Both pointers must be valid for `len` bytes.
pub(crate) unsafe fn copy_bytes(src: *const u8, dst: *mut u8, len: usize) {
    std::ptr::copy(src, dst, len);
}
