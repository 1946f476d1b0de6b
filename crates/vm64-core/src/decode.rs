//! Instruction decoding: header byte -> tagged instruction record.

use crate::access::{vread64, vread8};
use crate::interrupt::{Irc, RaiseOutcome};
use crate::mmio::MmioFabric;
use crate::ram::Ram;
use crate::reg::{is_valid_reg, RegisterFile};
use crate::vector;
use crate::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Mov = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Or = 5,
    And = 6,
    Not = 7,
    Xor = 8,
    Push = 9,
    Pop = 10,
    Call = 11,
    Cmp = 12,
    Cmov = 13,
    Ret = 14,
    Reti = 15,
    Sysret = 16,
    Syscall = 17,
    Hlt = 18,
    Coandsw = 19,
}

impl Opcode {
    fn from_raw(raw: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match raw {
            0 => Mov,
            1 => Add,
            2 => Sub,
            3 => Mul,
            4 => Div,
            5 => Or,
            6 => And,
            7 => Not,
            8 => Xor,
            9 => Push,
            10 => Pop,
            11 => Call,
            12 => Cmp,
            13 => Cmov,
            14 => Ret,
            15 => Reti,
            16 => Sysret,
            17 => Syscall,
            18 => Hlt,
            19 => Coandsw,
            _ => return None,
        })
    }
}

/// `enum one_argument_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneArgOperand {
    Register(u8),
    Address(u64),
    Imm(u64),
}

/// `enum cmove_argument_mode`; note the non-contiguous encoding (3 and 7 are
/// not assigned).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmoveCond {
    Ne = 0,
    Gt = 1,
    Lt = 2,
    Eq = 4,
    Le = 6,
    Ge = 5,
}

impl CmoveCond {
    fn from_raw(raw: u8) -> Option<CmoveCond> {
        use CmoveCond::*;
        Some(match raw {
            0 => Ne,
            1 => Gt,
            2 => Lt,
            4 => Eq,
            6 => Le,
            5 => Ge,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Rr { opcode: Opcode, reg1: u8, reg2: u8 },
    Rm { opcode: Opcode, reg1: u8, address: u64 },
    Ri { opcode: Opcode, reg1: u8, imm64: u64 },
    Oa { opcode: Opcode, operand: OneArgOperand },
    No { opcode: Opcode },
    Cm { cond: CmoveCond, reg1: u8, reg2: u8 },
}

/// Outcome of decoding one instruction at the current PC.
pub enum Decoded {
    /// Decode succeeded; PC should advance to `next_pc` before execution.
    Ok { instruction: Instruction, next_pc: u64 },
    /// Decode failed and INVALID_OPCODE has already been raised on the IRC
    /// — PC now points at that handler and must not be overwritten with a
    /// stale next-PC.
    Fault,
}

/// Full decode: raises INVALID_OPCODE on any malformed encoding.
pub fn decode(
    regs: &mut RegisterFile,
    ram: &Ram,
    mmio: &mut MmioFabric,
    irc: &mut Irc,
    pc: u64,
) -> Result<Decoded, HostError> {
    match decode_inner_immutable(regs, ram, mmio, pc)? {
        Some((instruction, next_pc)) => Ok(Decoded::Ok { instruction, next_pc }),
        None => {
            irc.raise(regs, ram, vector::INVALID_OPCODE)?;
            Ok(Decoded::Fault)
        }
    }
}

/// Read-only decode used by external tooling (disassemblers): never raises
/// an interrupt, returns `None` on any malformed encoding.
pub fn decode_readonly(
    regs: &RegisterFile,
    ram: &Ram,
    mmio: &mut MmioFabric,
    pc: u64,
) -> Result<Option<(Instruction, u64)>, HostError> {
    decode_inner_immutable(regs, ram, mmio, pc)
}

fn decode_inner_immutable(
    regs: &RegisterFile,
    ram: &Ram,
    mmio: &mut MmioFabric,
    pc: u64,
) -> Result<Option<(Instruction, u64)>, HostError> {
    let header = vread8(regs, ram, mmio, pc)?;
    let shape = header >> 5;
    let opcode_raw = header & 0x1F;
    let opcode = match Opcode::from_raw(opcode_raw) {
        Some(op) => op,
        None => return Ok(None),
    };
    let mut next_pc = pc + 1;

    let instruction = match shape {
        4 => {
            // NO
            use Opcode::*;
            if !matches!(opcode, Ret | Reti | Sysret | Syscall | Hlt) {
                return Ok(None);
            }
            Instruction::No { opcode }
        }
        3 => {
            // OA
            use Opcode::*;
            if !matches!(opcode, Push | Pop | Call) {
                return Ok(None);
            }
            let mode = vread8(regs, ram, mmio, next_pc)?;
            next_pc += 1;
            let operand = match mode {
                0 => {
                    let reg = vread8(regs, ram, mmio, next_pc)?;
                    next_pc += 1;
                    OneArgOperand::Register(reg)
                }
                1 => {
                    let address = vread64(regs, ram, mmio, next_pc)?;
                    next_pc += 8;
                    OneArgOperand::Address(address)
                }
                2 => {
                    let imm64 = vread64(regs, ram, mmio, next_pc)?;
                    next_pc += 8;
                    OneArgOperand::Imm(imm64)
                }
                _ => return Ok(None),
            };
            Instruction::Oa { opcode, operand }
        }
        0 => {
            // RR
            use Opcode::*;
            if !matches!(opcode, Mov | Add | Sub | Mul | Div | Or | And | Not | Xor | Cmp) {
                return Ok(None);
            }
            let reg1 = vread8(regs, ram, mmio, next_pc)?;
            next_pc += 1;
            let reg2 = vread8(regs, ram, mmio, next_pc)?;
            next_pc += 1;
            if !is_valid_reg(reg1) || !is_valid_reg(reg2) {
                return Ok(None);
            }
            Instruction::Rr { opcode, reg1, reg2 }
        }
        1 => {
            // RM
            use Opcode::*;
            if !matches!(opcode, Mov | Coandsw) {
                return Ok(None);
            }
            let reg1 = vread8(regs, ram, mmio, next_pc)?;
            next_pc += 1;
            if !is_valid_reg(reg1) {
                return Ok(None);
            }
            let address = vread64(regs, ram, mmio, next_pc)?;
            next_pc += 8;
            Instruction::Rm { opcode, reg1, address }
        }
        2 => {
            // RI
            use Opcode::*;
            if !matches!(opcode, Mov | Add | Sub | Mul | Div | Or | And | Not | Xor | Cmp) {
                return Ok(None);
            }
            let reg1 = vread8(regs, ram, mmio, next_pc)?;
            next_pc += 1;
            if !is_valid_reg(reg1) {
                return Ok(None);
            }
            let imm64 = vread64(regs, ram, mmio, next_pc)?;
            next_pc += 8;
            Instruction::Ri { opcode, reg1, imm64 }
        }
        5 => {
            // CM
            use Opcode::*;
            if opcode != Cmov {
                return Ok(None);
            }
            let mb = vread8(regs, ram, mmio, next_pc)?;
            next_pc += 1;
            let cond = match CmoveCond::from_raw(mb >> 4) {
                Some(c) => c,
                None => return Ok(None),
            };
            let reg1 = vread8(regs, ram, mmio, next_pc)?;
            next_pc += 1;
            let reg2 = vread8(regs, ram, mmio, next_pc)?;
            next_pc += 1;
            if !is_valid_reg(reg1) || !is_valid_reg(reg2) {
                return Ok(None);
            }
            Instruction::Cm { cond, reg1, reg2 }
        }
        _ => return Ok(None),
    };

    Ok(Some((instruction, next_pc)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_no(opcode: Opcode) -> Vec<u8> {
        vec![(4u8 << 5) | opcode as u8]
    }

    fn encode_ri(opcode: Opcode, reg1: u8, imm: u64) -> Vec<u8> {
        let mut v = vec![(2u8 << 5) | opcode as u8, reg1];
        v.extend_from_slice(&imm.to_le_bytes());
        v
    }

    #[test]
    fn decodes_hlt() {
        let ram = Ram::new(64).unwrap();
        ram.write(0, &encode_no(Opcode::Hlt)).unwrap();
        let regs = RegisterFile::new();
        let mut mmio = MmioFabric::new();
        let (inst, next_pc) = decode_readonly(&regs, &ram, &mut mmio, 0).unwrap().unwrap();
        assert_eq!(inst, Instruction::No { opcode: Opcode::Hlt });
        assert_eq!(next_pc, 1);
    }

    #[test]
    fn decodes_mov_ri() {
        let ram = Ram::new(64).unwrap();
        ram.write(0, &encode_ri(Opcode::Mov, 0, 0x12)).unwrap();
        let regs = RegisterFile::new();
        let mut mmio = MmioFabric::new();
        let (inst, next_pc) = decode_readonly(&regs, &ram, &mut mmio, 0).unwrap().unwrap();
        assert_eq!(
            inst,
            Instruction::Ri {
                opcode: Opcode::Mov,
                reg1: 0,
                imm64: 0x12
            }
        );
        assert_eq!(next_pc, 10);
    }

    #[test]
    fn invalid_shape_opcode_pair_is_rejected() {
        let ram = Ram::new(64).unwrap();
        // shape = RR (0), opcode = HLT (18): illegal pair per the legal
        // combination table.
        ram.write(0, &[(0u8 << 5) | Opcode::Hlt as u8]).unwrap();
        let regs = RegisterFile::new();
        let mut mmio = MmioFabric::new();
        assert!(decode_readonly(&regs, &ram, &mut mmio, 0).unwrap().is_none());
    }

    #[test]
    fn rr_push_is_rejected_at_decode_time() {
        let ram = Ram::new(64).unwrap();
        // shape = RR (0), opcode = PUSH (9): PUSH is an OA-only opcode, so
        // this must be caught here rather than falling through to the
        // executor's invalid-operand fallback after PC has already advanced
        // past fabricated RR operand bytes.
        ram.write(0, &[(0u8 << 5) | Opcode::Push as u8, 0, 0]).unwrap();
        let regs = RegisterFile::new();
        let mut mmio = MmioFabric::new();
        assert!(decode_readonly(&regs, &ram, &mut mmio, 0).unwrap().is_none());
    }

    #[test]
    fn rm_add_is_rejected_at_decode_time() {
        let ram = Ram::new(64).unwrap();
        // shape = RM (1), opcode = ADD (1): ADD only has RR/RI forms.
        let mut bytes = vec![(1u8 << 5) | Opcode::Add as u8, 0];
        bytes.extend_from_slice(&0u64.to_le_bytes());
        ram.write(0, &bytes).unwrap();
        let regs = RegisterFile::new();
        let mut mmio = MmioFabric::new();
        assert!(decode_readonly(&regs, &ram, &mut mmio, 0).unwrap().is_none());
    }

    #[test]
    fn ri_coandsw_is_rejected_at_decode_time() {
        let ram = Ram::new(64).unwrap();
        // shape = RI (2), opcode = COANDSW (19): COANDSW only has the RM form.
        let mut bytes = vec![(2u8 << 5) | Opcode::Coandsw as u8, 0];
        bytes.extend_from_slice(&0u64.to_le_bytes());
        ram.write(0, &bytes).unwrap();
        let regs = RegisterFile::new();
        let mut mmio = MmioFabric::new();
        assert!(decode_readonly(&regs, &ram, &mut mmio, 0).unwrap().is_none());
    }

    #[test]
    fn out_of_range_register_is_rejected() {
        let ram = Ram::new(64).unwrap();
        ram.write(0, &[(0u8 << 5) | Opcode::Mov as u8, 200, 1])
            .unwrap();
        let regs = RegisterFile::new();
        let mut mmio = MmioFabric::new();
        assert!(decode_readonly(&regs, &ram, &mut mmio, 0).unwrap().is_none());
    }
}
