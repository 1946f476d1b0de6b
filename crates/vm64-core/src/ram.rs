//! Flat guest RAM behind a reader/writer lock.

use std::sync::RwLock;

use crate::error::HostError;

/// The guest's physical memory: one contiguous byte array shared behind a
/// `RwLock`. Typed reads take the read side, typed writes and MMIO-backed
/// framebuffer copies take the write side; nothing in this workspace holds
/// the lock across a guest fault, so poisoning only happens if a caller
/// panics mid-access, which we treat as a host bug rather than something
/// the guest program can provoke.
pub struct Ram {
    bytes: RwLock<Vec<u8>>,
    capacity: u64,
}

impl Ram {
    /// Allocate `capacity` bytes of zeroed guest RAM.
    pub fn new(capacity: u64) -> Result<Ram, HostError> {
        let len = usize::try_from(capacity).map_err(|_| HostError::RamAllocation {
            requested: capacity as usize,
        })?;
        Ok(Ram {
            bytes: RwLock::new(vec![0u8; len]),
            capacity,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Copy `image` into physical RAM starting at offset 0.
    pub fn load_image(&self, image: &[u8]) -> Result<(), HostError> {
        if image.len() as u64 > self.capacity {
            return Err(HostError::ImageTooLarge {
                image_len: image.len(),
                ram_cap: self.capacity as usize,
            });
        }
        let mut guard = self.bytes.write().map_err(|_| HostError::RamLockPoisoned)?;
        guard[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Read `len` bytes at physical `offset`, or `None` if out of bounds.
    pub fn read(&self, offset: u64, len: usize) -> Result<Option<Vec<u8>>, HostError> {
        let guard = self.bytes.read().map_err(|_| HostError::RamLockPoisoned)?;
        let start = offset as usize;
        let end = match start.checked_add(len) {
            Some(e) => e,
            None => return Ok(None),
        };
        if end > guard.len() {
            return Ok(None);
        }
        Ok(Some(guard[start..end].to_vec()))
    }

    /// Write `data` at physical `offset`; returns `false` if out of bounds.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<bool, HostError> {
        let mut guard = self.bytes.write().map_err(|_| HostError::RamLockPoisoned)?;
        let start = offset as usize;
        let end = match start.checked_add(data.len()) {
            Some(e) => e,
            None => return Ok(false),
        };
        if end > guard.len() {
            return Ok(false);
        }
        guard[start..end].copy_from_slice(data);
        Ok(true)
    }

    pub fn read_u8(&self, offset: u64) -> Result<Option<u8>, HostError> {
        Ok(self.read(offset, 1)?.map(|b| b[0]))
    }

    pub fn read_u64(&self, offset: u64) -> Result<Option<u64>, HostError> {
        Ok(self
            .read(offset, 8)?
            .map(|b| u64::from_le_bytes(b.try_into().unwrap())))
    }
}
