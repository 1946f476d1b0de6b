//! Host-level failures: things that stop the emulator from running at all,
//! as opposed to guest-visible faults, which the interrupt controller
//! handles and which never surface here.

use thiserror::Error;

/// Failures the host (CLI, test harness, embedder) can observe.
///
/// Guest faults (divide-by-zero, page fault, invalid opcode, protection
/// fault) are delivered through [`crate::Irc::raise`] and are not part of
/// this type — `Cpu::step` stays infallible on purpose.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to allocate {requested} bytes of guest RAM")]
    RamAllocation { requested: usize },

    #[error("image is {image_len} bytes, which does not fit in {ram_cap} bytes of RAM")]
    ImageTooLarge { image_len: usize, ram_cap: usize },

    #[error("MMIO hook registered at base {base:#x} (size {size:#x}) returned false for an address it claimed to own")]
    MmioHandlerRejected { base: u64, size: u64 },

    #[error("RAM lock was poisoned by a panic in another thread")]
    RamLockPoisoned,
}
