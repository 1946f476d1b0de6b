//! The MMIO dispatch fabric: an ordered list of hooks, first match wins.
//!
//! Hooks are scanned newest-registration-first with strict containment, and
//! handed to callers through an explicit [`MmioFabric`] object rather than a
//! process-global registry, so a [`crate::Cpu`] can own one without any
//! back-pointers.

/// A memory-mapped device. `offset` is already translated relative to the
/// hook's `base`; the hook never sees the raw physical address.
pub trait MmioHook: Send {
    fn base(&self) -> u64;
    fn size(&self) -> u64;
    fn read(&mut self, offset: u64, len: usize) -> Option<Vec<u8>>;
    fn write(&mut self, offset: u64, data: &[u8]) -> bool;
}

/// Ordered collection of MMIO hooks. New hooks are prepended, so the most
/// recently registered overlapping device wins ties.
#[derive(Default)]
pub struct MmioFabric {
    hooks: Vec<Box<dyn MmioHook>>,
}

/// Opaque identity token returned by [`MmioFabric::register`]; pass it to
/// [`MmioFabric::unregister`] to remove that exact hook later. Identity is
/// the hook's own address, not its position in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioHandle(usize);

fn hook_identity(hook: &Box<dyn MmioHook>) -> usize {
    hook.as_ref() as *const dyn MmioHook as *const () as usize
}

impl MmioFabric {
    pub fn new() -> MmioFabric {
        MmioFabric { hooks: Vec::new() }
    }

    pub fn register(&mut self, hook: Box<dyn MmioHook>) -> MmioHandle {
        let handle = MmioHandle(hook_identity(&hook));
        self.hooks.insert(0, hook);
        handle
    }

    /// Removes the hook matching `handle` by identity, returning whether one
    /// was found.
    pub fn unregister(&mut self, handle: MmioHandle) -> bool {
        match self.hooks.iter().position(|hook| hook_identity(hook) == handle.0) {
            Some(pos) => {
                self.hooks.remove(pos);
                true
            }
            None => false,
        }
    }

    fn find(&mut self, addr: u64, len: usize) -> Option<(&mut Box<dyn MmioHook>, u64)> {
        let len = len as u64;
        self.hooks.iter_mut().find_map(|hook| {
            let base = hook.base();
            let size = hook.size();
            let end = addr.checked_add(len)?;
            if addr >= base && end <= base.checked_add(size)? {
                Some((hook, addr - base))
            } else {
                None
            }
        })
    }

    /// Returns `None` if no registered hook claims this address range.
    pub fn read(&mut self, addr: u64, len: usize) -> Option<Vec<u8>> {
        let (hook, offset) = self.find(addr, len)?;
        hook.read(offset, len)
    }

    /// Returns `None` if no hook claims the range, `Some(false)` if the
    /// hook that claimed it refused the write.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Option<bool> {
        let (hook, offset) = self.find(addr, data.len())?;
        Some(hook.write(offset, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        base: u64,
        size: u64,
        value: u64,
    }

    impl MmioHook for Counter {
        fn base(&self) -> u64 {
            self.base
        }
        fn size(&self) -> u64 {
            self.size
        }
        fn read(&mut self, offset: u64, len: usize) -> Option<Vec<u8>> {
            if offset != 0 || len != 8 {
                return None;
            }
            Some(self.value.to_le_bytes().to_vec())
        }
        fn write(&mut self, offset: u64, data: &[u8]) -> bool {
            if offset != 0 || data.len() != 8 {
                return false;
            }
            self.value = u64::from_le_bytes(data.try_into().unwrap());
            true
        }
    }

    #[test]
    fn unclaimed_address_misses() {
        let mut fabric = MmioFabric::new();
        fabric.register(Box::new(Counter {
            base: 0x1000,
            size: 8,
            value: 0,
        }));
        assert!(fabric.read(0x2000, 8).is_none());
    }

    #[test]
    fn claimed_address_round_trips() {
        let mut fabric = MmioFabric::new();
        fabric.register(Box::new(Counter {
            base: 0x1000,
            size: 8,
            value: 0,
        }));
        assert_eq!(fabric.write(0x1000, &99u64.to_le_bytes()), Some(true));
        assert_eq!(fabric.read(0x1000, 8), Some(99u64.to_le_bytes().to_vec()));
    }

    #[test]
    fn newest_registration_wins_on_overlap() {
        let mut fabric = MmioFabric::new();
        fabric.register(Box::new(Counter {
            base: 0,
            size: 16,
            value: 1,
        }));
        fabric.register(Box::new(Counter {
            base: 0,
            size: 16,
            value: 2,
        }));
        assert_eq!(fabric.read(0, 8), Some(2u64.to_le_bytes().to_vec()));
    }

    #[test]
    fn unregister_removes_by_identity_and_reports_whether_found() {
        let mut fabric = MmioFabric::new();
        let first = fabric.register(Box::new(Counter { base: 0, size: 16, value: 1 }));
        let second = fabric.register(Box::new(Counter { base: 0x1000, size: 16, value: 2 }));

        assert!(fabric.unregister(first));
        assert!(fabric.read(0, 8).is_none());
        assert_eq!(fabric.read(0x1000, 8), Some(2u64.to_le_bytes().to_vec()));

        assert!(!fabric.unregister(first));
        assert!(fabric.unregister(second));
        assert!(fabric.read(0x1000, 8).is_none());
    }
}
