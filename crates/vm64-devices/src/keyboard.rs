//! Keyboard MMIO device: a bounded byte queue fed by a host UI thread and
//! drained by the guest.
//!
//! MMIO surface (offsets relative to the device's registered base, read as
//! 64-bit words since that is the only width `MOV` issues): offset 0 =
//! "bytes available" status (1 if non-empty), offset 8 = "pop one byte" —
//! reading it returns the front byte zero-extended to 64 bits *and* removes
//! it from the queue, so the following status read goes back to 0.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use vm64_core::mmio::MmioHook;

/// Physical base address the CLI loader registers this device at.
pub const BASE: u64 = 0x9001_0000;
pub const SIZE: u64 = 16;

/// Matches the fixed-capacity push-fails-when-full semantics of a ring
/// buffer rather than an unbounded queue.
const CAPACITY: usize = 256;

struct Inner {
    queue: VecDeque<u8>,
    pending: bool,
}

/// Shared handle a UI thread uses to feed key events; the [`MmioHook`]
/// implementation below drains the same queue from the guest side.
pub struct Keyboard {
    inner: Mutex<Inner>,
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyboard {
    pub fn new() -> Keyboard {
        Keyboard {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(CAPACITY),
                pending: false,
            }),
        }
    }

    /// Called by a host UI thread. Returns `false` if the queue is full.
    pub fn push_byte(&self, byte: u8) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.len() >= CAPACITY {
            return false;
        }
        inner.queue.push_back(byte);
        inner.pending = true;
        true
    }

    /// Called once per CPU step: checks the pending flag under the lock and
    /// clears it. The caller raises the keyboard interrupt (vector 11) if
    /// this returns `true`.
    pub fn take_pending(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        std::mem::replace(&mut inner.pending, false)
    }

    /// Interior-mutability body shared by both the by-value and `Arc`
    /// [`MmioHook`] impls below.
    fn mmio_read(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        match offset {
            0 => {
                let value = u64::from(!inner.queue.is_empty());
                Some(value.to_le_bytes()[..len.min(8)].to_vec())
            }
            8 => {
                let byte = inner.queue.pop_front().unwrap_or(0);
                Some((byte as u64).to_le_bytes()[..len.min(8)].to_vec())
            }
            _ => None,
        }
    }

    fn mmio_write(&self, _offset: u64, _data: &[u8]) -> bool {
        false
    }
}

impl MmioHook for Keyboard {
    fn base(&self) -> u64 {
        BASE
    }

    fn size(&self) -> u64 {
        SIZE
    }

    fn read(&mut self, offset: u64, len: usize) -> Option<Vec<u8>> {
        self.mmio_read(offset, len)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> bool {
        self.mmio_write(offset, data)
    }
}

/// Lets a host keep its own `Arc<Keyboard>` handle for feeding key events
/// and polling the pending flag while a clone of the same `Arc` sits
/// registered in the [`vm64_core::MmioFabric`] as the actual hook. A thin
/// local wrapper, rather than implementing `MmioHook` for `Arc<Keyboard>`
/// directly, since neither the trait nor `Arc` is defined in this crate.
pub struct SharedKeyboard(pub Arc<Keyboard>);

impl MmioHook for SharedKeyboard {
    fn base(&self) -> u64 {
        BASE
    }

    fn size(&self) -> u64 {
        SIZE
    }

    fn read(&mut self, offset: u64, len: usize) -> Option<Vec<u8>> {
        self.0.mmio_read(offset, len)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> bool {
        self.0.mmio_write(offset, data)
    }
}
