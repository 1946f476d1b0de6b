//! The CPU step engine: ties the register file, RAM, the MMIO fabric and
//! the interrupt controller together and executes one decoded instruction
//! at a time.

mod exec;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::access;
use crate::decode::{decode, Decoded};
use crate::interrupt::{Irc, RaiseOutcome};
use crate::mmio::MmioFabric;
use crate::ram::Ram;
use crate::reg::{Register, RegisterFile, NUM_REGISTERS};
use crate::HostError;

/// The end of the physical RAM reserved for the initial supervisor stack
/// page.
const INIT_SUPERVISOR_STACK_RESERVE: u64 = 0x1000;

pub struct Cpu {
    pub regs: RegisterFile,
    pub ram: Ram,
    pub mmio: MmioFabric,
    pub irc: Irc,

    /// Set by a host UI thread; polled once per step.
    pub paused: AtomicBool,
    /// Set by a host UI thread; polled once per step, causes the step loop
    /// driving this CPU to exit before the next instruction.
    pub halted: AtomicBool,

    snapshot: Mutex<[u64; NUM_REGISTERS]>,
}

impl Cpu {
    /// Allocate `ram_capacity` bytes of RAM, seed SP1/SP0 from its capacity,
    /// and start fetching at PC = 0.
    pub fn new(ram_capacity: u64) -> Result<Cpu, HostError> {
        let ram = Ram::new(ram_capacity)?;
        let mut regs = RegisterFile::new();
        regs.set(Register::SP1, ram.capacity());
        regs.set(Register::SP0, ram.capacity().saturating_sub(INIT_SUPERVISOR_STACK_RESERVE));
        regs.set(Register::PC, 0);

        Ok(Cpu {
            regs,
            ram,
            mmio: MmioFabric::new(),
            irc: Irc::new(),
            paused: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            snapshot: Mutex::new([0; NUM_REGISTERS]),
        })
    }

    /// Reset to the post-init state without reallocating RAM. Used when the
    /// interrupt controller reports a triple fault.
    pub fn reset(&mut self) {
        let cap = self.ram.capacity();
        self.regs = RegisterFile::new();
        self.regs.set(Register::SP1, cap);
        self.regs
            .set(Register::SP0, cap.saturating_sub(INIT_SUPERVISOR_STACK_RESERVE));
        self.regs.set(Register::PC, 0);
        self.irc = Irc::new();
    }

    /// Copy the register file into the shared snapshot a host UI thread may
    /// observe. No UI thread reads `self.regs` directly.
    pub fn publish_snapshot(&self) {
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = self.regs.snapshot();
        }
    }

    pub fn snapshot(&self) -> [u64; NUM_REGISTERS] {
        self.snapshot.lock().map(|g| *g).unwrap_or([0; NUM_REGISTERS])
    }

    fn active_sp(&self) -> u64 {
        let reg = if self.regs.get(Register::PPR) == 0 {
            Register::SP1
        } else {
            Register::SP0
        };
        self.regs.get(reg)
    }

    fn set_active_sp(&mut self, value: u64) {
        let reg = if self.regs.get(Register::PPR) == 0 {
            Register::SP1
        } else {
            Register::SP0
        };
        self.regs.set(reg, value);
    }

    /// Reset to the post-init state if the last interrupt raise escalated
    /// all the way to a triple fault.
    fn apply_raise_outcome(&mut self, outcome: Option<RaiseOutcome>) {
        if outcome == Some(RaiseOutcome::TripleFault) {
            self.reset();
        }
    }

    /// Route a 64-bit guest read through the checked (user) primitive in
    /// user mode, or the unchecked (supervisor) primitive otherwise.
    fn mem_read64(&mut self, vaddr: u64) -> Result<u64, HostError> {
        if self.regs.get(Register::PPR) == 1 {
            let (value, outcome) =
                access::vread64_u(&mut self.regs, &self.ram, &mut self.mmio, &mut self.irc, vaddr)?;
            self.apply_raise_outcome(outcome);
            Ok(value)
        } else {
            access::vread64(&self.regs, &self.ram, &mut self.mmio, vaddr)
        }
    }

    fn mem_write64(&mut self, vaddr: u64, value: u64) -> Result<bool, HostError> {
        if self.regs.get(Register::PPR) == 1 {
            let (wrote, outcome) =
                access::vwrite64_u(&mut self.regs, &self.ram, &mut self.mmio, &mut self.irc, vaddr, value)?;
            self.apply_raise_outcome(outcome);
            Ok(wrote)
        } else {
            access::vwrite64(&self.regs, &self.ram, &mut self.mmio, vaddr, value)
        }
    }

    /// Execute one instruction. Returns `Ok(false)` iff a HLT executed;
    /// `Ok(true)` otherwise, including steps where a fault was raised (the
    /// fault handler becomes the next PC and execution continues).
    pub fn step(&mut self) -> Result<bool, HostError> {
        let old_pc = self.regs.get(Register::PC);
        match decode(&mut self.regs, &self.ram, &mut self.mmio, &mut self.irc, old_pc)? {
            Decoded::Fault => Ok(true),
            Decoded::Ok { instruction, next_pc } => {
                self.regs.set(Register::PC, next_pc);
                exec::dispatch(self, old_pc, next_pc, instruction)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_seeds_stack_pointers_from_ram_capacity() {
        let cpu = Cpu::new(0x10000).unwrap();
        assert_eq!(cpu.regs.get(Register::SP1), 0x10000);
        assert_eq!(cpu.regs.get(Register::SP0), 0x10000 - INIT_SUPERVISOR_STACK_RESERVE);
        assert_eq!(cpu.regs.get(Register::PC), 0);
    }

    #[test]
    fn hlt_stops_execution_and_restores_pc() {
        let mut cpu = Cpu::new(0x10000).unwrap();
        cpu.ram.write(0, &[(4u8 << 5) | 18]).unwrap(); // NO-shape HLT
        let continue_running = cpu.step().unwrap();
        assert!(!continue_running);
        assert_eq!(cpu.regs.get(Register::PC), 0);
    }
}
