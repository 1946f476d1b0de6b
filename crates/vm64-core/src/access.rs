//! Typed 8/16/32/64-bit memory access: the layer that ties paging, the MMIO
//! fabric and RAM together. Every access translates the virtual address
//! first, then gives the MMIO fabric a chance to intercept the physical
//! address before falling back to RAM.

use crate::interrupt::{Irc, RaiseOutcome};
use crate::mmio::MmioFabric;
use crate::paging::{translate_checked, translate_supervisor, Translation};
use crate::ram::Ram;
use crate::reg::{Register, RegisterFile};
use crate::vector;
use crate::HostError;

fn mmio_read_or_ram(
    mmio: &mut MmioFabric,
    ram: &Ram,
    phys: u64,
    len: usize,
) -> Result<Vec<u8>, HostError> {
    if let Some(bytes) = mmio.read(phys, len) {
        return Ok(bytes);
    }
    Ok(ram.read(phys, len)?.unwrap_or_else(|| vec![0u8; len]))
}

/// A matched MMIO hook returning `false` means it refused a write into a
/// range it claimed to own — a host-level misconfiguration, not something
/// the guest program caused, so it escalates to [`HostError`] instead of
/// quietly looking like a successful no-op.
fn mmio_write_or_ram(
    mmio: &mut MmioFabric,
    ram: &Ram,
    phys: u64,
    data: &[u8],
) -> Result<bool, HostError> {
    match mmio.write(phys, data) {
        Some(true) => Ok(true),
        Some(false) => Err(HostError::MmioHandlerRejected {
            base: phys,
            size: data.len() as u64,
        }),
        None => ram.write(phys, data),
    }
}

macro_rules! supervisor_rw {
    ($read:ident, $write:ident, $ty:ty) => {
        pub fn $read(regs: &RegisterFile, ram: &Ram, mmio: &mut MmioFabric, vaddr: u64) -> Result<$ty, HostError> {
            let pptr = regs.get(Register::PPTR);
            let phys = match translate_supervisor(ram, pptr, vaddr)? {
                Translation::Phys(p) => p,
                Translation::Fault => return Ok(0),
            };
            let bytes = mmio_read_or_ram(mmio, ram, phys, std::mem::size_of::<$ty>())?;
            Ok(<$ty>::from_le_bytes(bytes.try_into().unwrap_or([0; std::mem::size_of::<$ty>()])))
        }

        pub fn $write(
            regs: &RegisterFile,
            ram: &Ram,
            mmio: &mut MmioFabric,
            vaddr: u64,
            value: $ty,
        ) -> Result<bool, HostError> {
            let pptr = regs.get(Register::PPTR);
            let phys = match translate_supervisor(ram, pptr, vaddr)? {
                Translation::Phys(p) => p,
                Translation::Fault => return Ok(false),
            };
            mmio_write_or_ram(mmio, ram, phys, &value.to_le_bytes())
        }
    };
}

supervisor_rw!(vread8, vwrite8, u8);
supervisor_rw!(vread16, vwrite16, u16);
supervisor_rw!(vread32, vwrite32, u32);
supervisor_rw!(vread64, vwrite64, u64);

macro_rules! user_rw {
    ($read:ident, $write:ident, $ty:ty) => {
        /// Returns 0 on a faulting access. The second element of the result
        /// is `Some(outcome)` of the PAGE_FAULT raise when a fault occurred
        /// (the caller must reset the CPU on `RaiseOutcome::TripleFault`) or
        /// `None` when the access succeeded.
        pub fn $read(
            regs: &mut RegisterFile,
            ram: &Ram,
            mmio: &mut MmioFabric,
            irc: &mut Irc,
            vaddr: u64,
        ) -> Result<($ty, Option<RaiseOutcome>), HostError> {
            let pptr = regs.get(Register::PPTR);
            let supervisor = regs.get(Register::PPR) == 0;
            match translate_checked(ram, pptr, vaddr, false, supervisor)? {
                Translation::Phys(phys) => {
                    let bytes = mmio_read_or_ram(mmio, ram, phys, std::mem::size_of::<$ty>())?;
                    Ok((<$ty>::from_le_bytes(bytes.try_into().unwrap_or([0; std::mem::size_of::<$ty>()])), None))
                }
                Translation::Fault => {
                    let outcome = irc.raise(regs, ram, vector::PAGE_FAULT)?;
                    Ok((0, Some(outcome)))
                }
            }
        }

        /// Returns false on a faulting access; see [`$read`] for the
        /// `RaiseOutcome` contract.
        pub fn $write(
            regs: &mut RegisterFile,
            ram: &Ram,
            mmio: &mut MmioFabric,
            irc: &mut Irc,
            vaddr: u64,
            value: $ty,
        ) -> Result<(bool, Option<RaiseOutcome>), HostError> {
            let pptr = regs.get(Register::PPTR);
            let supervisor = regs.get(Register::PPR) == 0;
            match translate_checked(ram, pptr, vaddr, true, supervisor)? {
                Translation::Phys(phys) => Ok((mmio_write_or_ram(mmio, ram, phys, &value.to_le_bytes())?, None)),
                Translation::Fault => {
                    let outcome = irc.raise(regs, ram, vector::PAGE_FAULT)?;
                    Ok((false, Some(outcome)))
                }
            }
        }
    };
}

user_rw!(vread8_u, vwrite8_u, u8);
user_rw!(vread16_u, vwrite16_u, u16);
user_rw!(vread32_u, vwrite32_u, u32);
user_rw!(vread64_u, vwrite64_u, u64);
