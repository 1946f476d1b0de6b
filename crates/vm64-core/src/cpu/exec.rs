//! Per-opcode execution, split out of [`super::Cpu::step`] the way the
//! decoder's legal (shape, opcode) table is split from its byte-stream
//! walk: one file for "what shape did we get", one for "what does it mean".

use super::Cpu;
use crate::decode::{CmoveCond, Instruction, OneArgOperand, Opcode};
use crate::reg::Register;
use crate::{flags, vector, HostError};

fn update_arith_flags(cpu: &mut Cpu, res: u64, carry: bool, overflow: bool) {
    let mut fr = cpu.regs.get(Register::FR) & !(flags::CF | flags::OF | flags::ZF | flags::SF);
    if carry {
        fr |= flags::CF;
    }
    if overflow {
        fr |= flags::OF;
    }
    if res == 0 {
        fr |= flags::ZF;
    }
    if (res as i64) < 0 {
        fr |= flags::SF;
    }
    cpu.regs.set(Register::FR, fr);
}

fn update_logic_flags(cpu: &mut Cpu, res: u64) {
    let mut fr = cpu.regs.get(Register::FR) & !(flags::CF | flags::OF | flags::ZF | flags::SF);
    if res == 0 {
        fr |= flags::ZF;
    }
    if (res as i64) < 0 {
        fr |= flags::SF;
    }
    cpu.regs.set(Register::FR, fr);
}

fn add_overflow(a: u64, b: u64, res: u64) -> bool {
    let (a, b, res) = (a as i64, b as i64, res as i64);
    (a > 0 && b > 0 && res < 0) || (a < 0 && b < 0 && res > 0)
}

fn sub_overflow(a: u64, b: u64, res: u64) -> bool {
    let (a, b, res) = (a as i64, b as i64, res as i64);
    (a > 0 && b < 0 && res < 0) || (a < 0 && b > 0 && res > 0)
}

fn cond_ok(cpu: &Cpu, cond: CmoveCond) -> bool {
    let fr = cpu.regs.get(Register::FR);
    let z = fr & flags::ZF != 0;
    let s = fr & flags::SF != 0;
    let o = fr & flags::OF != 0;
    match cond {
        CmoveCond::Ne => !z,
        CmoveCond::Eq => z,
        CmoveCond::Gt => !z && (s == o),
        CmoveCond::Lt => s != o,
        CmoveCond::Ge => s == o,
        CmoveCond::Le => z || (s != o),
    }
}

/// Raise INVALID_OPCODE for an otherwise-legally-shaped instruction whose
/// operand mode doesn't make sense for its opcode (e.g. `PUSH` with an
/// `ADDRESS` operand). Always continues execution (returns `Ok(true)`).
fn invalid_operand(cpu: &mut Cpu) -> Result<bool, HostError> {
    cpu.irc.raise(&mut cpu.regs, &cpu.ram, vector::INVALID_OPCODE)?;
    Ok(true)
}

pub fn dispatch(cpu: &mut Cpu, old_pc: u64, next_pc: u64, inst: Instruction) -> Result<bool, HostError> {
    match inst {
        Instruction::Rr { opcode: Opcode::Mov, reg1, reg2 } => {
            let v = cpu.regs.get_raw(reg2);
            cpu.regs.set_raw(reg1, v);
            Ok(true)
        }
        Instruction::Rm { opcode: Opcode::Mov, reg1, address } => {
            let v = cpu.mem_read64(address)?;
            cpu.regs.set_raw(reg1, v);
            Ok(true)
        }
        Instruction::Ri { opcode: Opcode::Mov, reg1, imm64 } => {
            cpu.regs.set_raw(reg1, imm64);
            Ok(true)
        }

        Instruction::Rr { opcode: op @ (Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div), reg1, reg2 } => {
            let a = cpu.regs.get_raw(reg1);
            let b = cpu.regs.get_raw(reg2);
            arith(cpu, op, reg1, a, b)
        }
        Instruction::Ri { opcode: op @ (Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div), reg1, imm64 } => {
            let a = cpu.regs.get_raw(reg1);
            arith(cpu, op, reg1, a, imm64)
        }

        Instruction::Rr { opcode: op @ (Opcode::Or | Opcode::And | Opcode::Xor | Opcode::Not), reg1, reg2 } => {
            let a = cpu.regs.get_raw(reg1);
            let b = if op == Opcode::Not { 0 } else { cpu.regs.get_raw(reg2) };
            logic(cpu, op, reg1, a, b)
        }
        Instruction::Ri { opcode: op @ (Opcode::Or | Opcode::And | Opcode::Xor | Opcode::Not), reg1, imm64 } => {
            let a = cpu.regs.get_raw(reg1);
            logic(cpu, op, reg1, a, imm64)
        }

        Instruction::Oa { opcode: Opcode::Push, operand } => {
            let value = match operand {
                OneArgOperand::Register(r) => cpu.regs.get_raw(r),
                OneArgOperand::Imm(v) => v,
                OneArgOperand::Address(_) => return invalid_operand(cpu),
            };
            let sp = cpu.active_sp().wrapping_sub(8);
            cpu.set_active_sp(sp);
            cpu.mem_write64(sp, value)?;
            Ok(true)
        }

        Instruction::Oa { opcode: Opcode::Pop, operand } => {
            let sp = cpu.active_sp();
            let value = cpu.mem_read64(sp)?;
            cpu.set_active_sp(sp.wrapping_add(8));
            match operand {
                OneArgOperand::Register(r) => {
                    cpu.regs.set_raw(r, value);
                    Ok(true)
                }
                _ => invalid_operand(cpu),
            }
        }

        Instruction::Oa { opcode: Opcode::Call, operand } => {
            let sp = cpu.active_sp().wrapping_sub(8);
            cpu.set_active_sp(sp);
            cpu.mem_write64(sp, next_pc)?;
            let target = match operand {
                OneArgOperand::Register(r) => cpu.regs.get_raw(r),
                OneArgOperand::Imm(v) => v,
                OneArgOperand::Address(addr) => cpu.mem_read64(addr)?,
            };
            cpu.regs.set(Register::PC, target);
            Ok(true)
        }

        Instruction::No { opcode: Opcode::Ret } => {
            let sp = cpu.active_sp();
            let target = cpu.mem_read64(sp)?;
            cpu.regs.set(Register::PC, target);
            cpu.set_active_sp(sp.wrapping_add(8));
            Ok(true)
        }

        Instruction::Rr { opcode: Opcode::Cmp, reg1, reg2 } => {
            let a = cpu.regs.get_raw(reg1);
            let b = cpu.regs.get_raw(reg2);
            cmp(cpu, a, b);
            Ok(true)
        }
        Instruction::Ri { opcode: Opcode::Cmp, reg1, imm64 } => {
            let a = cpu.regs.get_raw(reg1);
            cmp(cpu, a, imm64);
            Ok(true)
        }

        Instruction::Cm { cond, reg1, reg2 } => {
            if cond_ok(cpu, cond) {
                let v = cpu.regs.get_raw(reg2);
                cpu.regs.set_raw(reg1, v);
            }
            Ok(true)
        }

        Instruction::No { opcode: Opcode::Syscall } => {
            let sp = cpu.active_sp().wrapping_sub(8);
            cpu.set_active_sp(sp);
            cpu.mem_write64(sp, next_pc)?;
            cpu.regs.set(Register::PPR, 0);
            let slr = cpu.regs.get(Register::SLR);
            cpu.regs.set(Register::PC, slr);
            Ok(true)
        }

        Instruction::No { opcode: Opcode::Sysret } => {
            let sp = cpu.active_sp();
            let target = cpu.mem_read64(sp)?;
            cpu.regs.set(Register::PC, target);
            cpu.set_active_sp(sp.wrapping_add(8));
            cpu.regs.set(Register::PPR, 1);
            Ok(true)
        }

        Instruction::No { opcode: Opcode::Reti } => {
            cpu.irc.return_from_interrupt(&mut cpu.regs, &cpu.ram)?;
            Ok(true)
        }

        Instruction::No { opcode: Opcode::Hlt } => {
            cpu.regs.set(Register::PC, old_pc);
            Ok(false)
        }

        Instruction::Rm { opcode: Opcode::Coandsw, reg1, address } => {
            let t = cpu.mem_read64(address)?;
            // `reg1` here is the raw decoded register index, compared
            // directly as a value rather than looked up in the register file.
            if t == reg1 as u64 {
                let r0 = cpu.regs.get(Register::R0);
                cpu.mem_write64(address, r0)?;
            }
            cpu.regs.set(Register::R0, t);
            Ok(true)
        }

        _ => invalid_operand(cpu),
    }
}

fn arith(cpu: &mut Cpu, op: Opcode, dest: u8, a: u64, b: u64) -> Result<bool, HostError> {
    if op == Opcode::Div && b == 0 {
        cpu.irc.raise(&mut cpu.regs, &cpu.ram, vector::DIV_BY_ZERO)?;
        return Ok(true);
    }
    match op {
        Opcode::Add => {
            let res = a.wrapping_add(b);
            update_arith_flags(cpu, res, res < a, add_overflow(a, b, res));
            cpu.regs.set_raw(dest, res);
        }
        Opcode::Sub => {
            let res = a.wrapping_sub(b);
            update_arith_flags(cpu, res, a < b, sub_overflow(a, b, res));
            cpu.regs.set_raw(dest, res);
        }
        Opcode::Mul => {
            let res = a.wrapping_mul(b);
            let truncated = b != 0 && res / b != a;
            update_arith_flags(cpu, res, truncated, false);
            cpu.regs.set_raw(dest, res);
        }
        Opcode::Div => {
            cpu.regs.set_raw(dest, a / b);
            let fr = cpu.regs.get(Register::FR) & !(flags::CF | flags::OF | flags::ZF | flags::SF);
            cpu.regs.set(Register::FR, fr);
        }
        _ => unreachable!("arith() only called for ADD/SUB/MUL/DIV"),
    }
    Ok(true)
}

fn logic(cpu: &mut Cpu, op: Opcode, dest: u8, a: u64, b: u64) -> Result<bool, HostError> {
    let res = match op {
        Opcode::Or => a | b,
        Opcode::And => a & b,
        Opcode::Xor => a ^ b,
        Opcode::Not => !a,
        _ => unreachable!("logic() only called for OR/AND/XOR/NOT"),
    };
    cpu.regs.set_raw(dest, res);
    update_logic_flags(cpu, res);
    Ok(true)
}

fn cmp(cpu: &mut Cpu, a: u64, b: u64) {
    let res = a.wrapping_sub(b);
    update_arith_flags(cpu, res, a < b, sub_overflow(a, b, res));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Cpu;

    fn encode_ri(opcode: Opcode, reg1: u8, imm: u64) -> Vec<u8> {
        let mut v = vec![(2u8 << 5) | opcode as u8, reg1];
        v.extend_from_slice(&imm.to_le_bytes());
        v
    }

    #[test]
    fn add_sets_dest_and_zero_flag() {
        let mut cpu = Cpu::new(0x10000).unwrap();
        cpu.ram.write(0, &encode_ri(Opcode::Mov, 0, 5)).unwrap();
        cpu.ram.write(10, &encode_ri(Opcode::Add, 0, u64::MAX)).unwrap(); // 5 + (-1) = 4, no carry out of range here
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.regs.get(Register::R0), 4);
    }

    #[test]
    fn div_by_zero_raises_and_preserves_dest() {
        let mut cpu = Cpu::new(0x10000).unwrap();
        cpu.regs.set(Register::ITR, 0x2000);
        cpu.ram.write(0x2000 + 1 * 8, &0x8000u64.to_le_bytes()).unwrap();
        cpu.ram.write(0, &encode_ri(Opcode::Mov, 0, 0)).unwrap();
        cpu.ram.write(10, &encode_ri(Opcode::Mov, 1, 99)).unwrap();
        cpu.ram.write(20, &encode_ri(Opcode::Div, 1, 0)).unwrap();
        cpu.step().unwrap();
        cpu.step().unwrap();
        let continue_running = cpu.step().unwrap();
        assert!(continue_running);
        assert_eq!(cpu.regs.get(Register::R1), 99);
        assert_eq!(cpu.regs.get(Register::PC), 0x8000);
    }
}
