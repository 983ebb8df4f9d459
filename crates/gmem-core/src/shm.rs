//! POSIX shared memory wrapper

use crate::{Error, Result};
use shared_memory::{Shmem, ShmemConf, ShmemError};

/// Named shared memory region
pub struct SharedMemory {
    inner: Shmem,
    name: String,
    size: usize,
}

impl SharedMemory {
    /// Create a new region; the creator unlinks it when dropped
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::SharedMemory(format!("{name}: zero-sized region")));
        }
        let shmem = ShmemConf::new()
            .size(size)
            .os_id(name)
            .create()
            .map_err(|e| Error::SharedMemory(format!("{name}: {e}")))?;

        Ok(Self {
            inner: shmem,
            name: name.to_string(),
            size,
        })
    }

    /// Attach to a region created elsewhere
    pub fn open(name: &str) -> Result<Self> {
        let shmem = ShmemConf::new()
            .os_id(name)
            .open()
            .map_err(|e| Error::SharedMemory(format!("{name}: {e}")))?;

        let size = shmem.len();

        Ok(Self {
            inner: shmem,
            name: name.to_string(),
            size,
        })
    }

    /// Create the region, or attach if another process won the race
    pub fn create_or_open(name: &str, size: usize) -> Result<Self> {
        let created = ShmemConf::new().size(size).os_id(name).create();
        match created {
            Ok(shmem) => Ok(Self {
                inner: shmem,
                name: name.to_string(),
                size,
            }),
            Err(ShmemError::MappingIdExists) | Err(ShmemError::LinkExists) => Self::open(name),
            Err(e) => Err(Error::SharedMemory(format!("{name}: {e}"))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether dropping this handle unlinks the region
    pub fn is_owner(&self) -> bool {
        self.inner.is_owner()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_ptr()
    }
}

// Safety: the mapping stays valid for the lifetime of the handle and may be
// used from any thread; synchronisation of the bytes is the caller's concern
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}
