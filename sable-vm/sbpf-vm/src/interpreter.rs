// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! The fetch/decode/execute loop.
//!
//! Per instruction, in order:
//! 1. `pc` must be inside text, else `SigText`.
//! 2. At least [`INSTRUCTION_COST`] compute units must remain, else `SigCost`.
//! 3. The trace sink, if any, observes the pre-execution state.
//! 4. The instruction executes. A fault leaves `pc`, `ic` and `cu` untouched,
//!    except for calls and syscalls, which are charged before they can fail.
//!    A call that faults on its target leaves `pc` at that target.
//! 5. The instruction is charged and `pc` advances.

use crate::{
    constants::{INSN_SIZE, INSTRUCTION_COST, MM_PROGRAM_START, REG_CNT},
    errors::Fault,
    instruction::{Instruction, mem_access_size, opcodes::*},
    memory::AccessType,
    syscalls::SyscallContext,
    vm::Vm,
};

enum Step {
    /// Continue at the given instruction index.
    Next(u64),
    /// The program exited at call depth zero.
    Exit,
}

#[inline]
fn sign_extend(imm: i32) -> u64 {
    imm as i64 as u64
}

#[inline]
fn jump_target(pc: u64, off: i16) -> u64 {
    pc.wrapping_add(off as i64 as u64).wrapping_add(1)
}

impl Vm<'_> {
    pub(crate) fn interpret(&mut self) -> Result<(), Fault> {
        loop {
            let word = self.program.word(self.pc).ok_or(Fault::SigText)?;
            if self.cu < INSTRUCTION_COST {
                return Err(Fault::SigCost);
            }
            if let Some(trace) = self.trace.as_deref_mut() {
                let mut regs = [0u64; REG_CNT];
                regs.copy_from_slice(&self.reg[..REG_CNT]);
                trace.instruction(self.pc, self.ic, self.cu, &regs);
            }

            match self.step(Instruction::decode(word))? {
                Step::Next(next_pc) => {
                    self.pc = next_pc;
                },
                Step::Exit => return Ok(()),
            }
        }
    }

    /// Charges one instruction.
    #[inline]
    fn charge(&mut self) {
        self.cu -= INSTRUCTION_COST;
        self.ic += 1;
    }

    /// Retires a non-branching instruction.
    #[inline]
    fn retire(&mut self, next_pc: u64) -> Result<Step, Fault> {
        self.charge();
        Ok(Step::Next(next_pc))
    }

    fn step(&mut self, insn: Instruction) -> Result<Step, Fault> {
        let version = self.program.sbpf_version();
        let pc = self.pc;
        let next_pc = pc + 1;
        let dst = insn.dst as usize;
        let src = insn.src as usize;
        let imm = sign_extend(insn.imm);

        match insn.opc {
            LDDW => {
                if !version.enable_lddw() {
                    return Err(Fault::SigIll);
                }
                let hi = self.program.word(next_pc).ok_or(Fault::SigSplit)?;
                let hi = Instruction::decode(hi);
                self.reg[dst] = (insn.imm as u32 as u64) | ((hi.imm as u32 as u64) << 32);
                self.retire(pc + 2)
            },

            LDXB | LDXH | LDXW | LDXDW => {
                let sz = mem_access_size(insn.opc).ok_or(Fault::SigIll)?;
                let vaddr = self.reg[src].wrapping_add(insn.off as i64 as u64);
                let value = self.memory.load(vaddr, sz)?;
                self.trace_memory(vaddr, sz, AccessType::Load, value);
                self.reg[dst] = value;
                self.retire(next_pc)
            },
            STB | STH | STW | STDW | STXB | STXH | STXW | STXDW => {
                let sz = mem_access_size(insn.opc).ok_or(Fault::SigIll)?;
                let vaddr = self.reg[dst].wrapping_add(insn.off as i64 as u64);
                let value = if insn.class() == CLS_ST {
                    imm
                } else {
                    self.reg[src]
                };
                self.memory.store(vaddr, sz, value)?;
                self.trace_memory(vaddr, sz, AccessType::Store, value);
                self.retire(next_pc)
            },

            ADD32_IMM | ADD32_REG | SUB32_IMM | SUB32_REG => {
                let rhs = if insn.opc & 0x08 == 0 {
                    insn.imm as u32
                } else {
                    self.reg[src] as u32
                };
                let lhs = self.reg[dst] as u32;
                let res = if matches!(insn.opc, ADD32_IMM | ADD32_REG) {
                    lhs.wrapping_add(rhs)
                } else {
                    lhs.wrapping_sub(rhs)
                };
                self.reg[dst] = if version.explicit_sign_extension_of_results() {
                    res as i32 as i64 as u64
                } else {
                    res as u64
                };
                self.retire(next_pc)
            },
            MUL32_IMM | MUL32_REG => {
                let rhs = self.alu32_rhs(insn);
                // The product is sign extended in every version.
                self.reg[dst] = (self.reg[dst] as i32).wrapping_mul(rhs as i32) as i64 as u64;
                self.retire(next_pc)
            },
            DIV32_IMM | DIV32_REG | MOD32_IMM | MOD32_REG => {
                let rhs = self.alu32_rhs(insn);
                if rhs == 0 {
                    return Err(Fault::SigIll);
                }
                let lhs = self.reg[dst] as u32;
                let res = if matches!(insn.opc, DIV32_IMM | DIV32_REG) {
                    lhs / rhs
                } else {
                    lhs % rhs
                };
                self.reg[dst] = res as u64;
                self.retire(next_pc)
            },
            OR32_IMM | OR32_REG | AND32_IMM | AND32_REG | XOR32_IMM | XOR32_REG | LSH32_IMM
            | LSH32_REG | RSH32_IMM | RSH32_REG | ARSH32_IMM | ARSH32_REG | MOV32_IMM
            | MOV32_REG => {
                let rhs = self.alu32_rhs(insn);
                let lhs = self.reg[dst] as u32;
                let res = match insn.opc {
                    OR32_IMM | OR32_REG => lhs | rhs,
                    AND32_IMM | AND32_REG => lhs & rhs,
                    XOR32_IMM | XOR32_REG => lhs ^ rhs,
                    LSH32_IMM | LSH32_REG => lhs.wrapping_shl(rhs),
                    RSH32_IMM | RSH32_REG => lhs.wrapping_shr(rhs),
                    ARSH32_IMM | ARSH32_REG => (lhs as i32).wrapping_shr(rhs) as u32,
                    _ => rhs,
                };
                self.reg[dst] = res as u64;
                self.retire(next_pc)
            },
            NEG32 => {
                if !version.enable_neg() {
                    return Err(Fault::SigIll);
                }
                self.reg[dst] = (self.reg[dst] as i32).wrapping_neg() as u32 as u64;
                self.retire(next_pc)
            },
            LE => {
                if !version.enable_le() {
                    return Err(Fault::SigIll);
                }
                self.reg[dst] = match insn.imm {
                    16 => self.reg[dst] as u16 as u64,
                    32 => self.reg[dst] as u32 as u64,
                    64 => self.reg[dst],
                    _ => return Err(Fault::SigIll),
                };
                self.retire(next_pc)
            },
            BE => {
                self.reg[dst] = match insn.imm {
                    16 => (self.reg[dst] as u16).swap_bytes() as u64,
                    32 => (self.reg[dst] as u32).swap_bytes() as u64,
                    64 => self.reg[dst].swap_bytes(),
                    _ => return Err(Fault::SigIll),
                };
                self.retire(next_pc)
            },

            ADD64_IMM | ADD64_REG | SUB64_IMM | SUB64_REG | MUL64_IMM | MUL64_REG | OR64_IMM
            | OR64_REG | AND64_IMM | AND64_REG | XOR64_IMM | XOR64_REG | LSH64_IMM | LSH64_REG
            | RSH64_IMM | RSH64_REG | ARSH64_IMM | ARSH64_REG | MOV64_IMM | MOV64_REG => {
                let rhs = self.alu64_rhs(insn);
                let lhs = self.reg[dst];
                self.reg[dst] = match insn.opc {
                    ADD64_IMM | ADD64_REG => lhs.wrapping_add(rhs),
                    SUB64_IMM | SUB64_REG => lhs.wrapping_sub(rhs),
                    MUL64_IMM | MUL64_REG => lhs.wrapping_mul(rhs),
                    OR64_IMM | OR64_REG => lhs | rhs,
                    AND64_IMM | AND64_REG => lhs & rhs,
                    XOR64_IMM | XOR64_REG => lhs ^ rhs,
                    LSH64_IMM | LSH64_REG => lhs.wrapping_shl(rhs as u32),
                    RSH64_IMM | RSH64_REG => lhs.wrapping_shr(rhs as u32),
                    ARSH64_IMM | ARSH64_REG => (lhs as i64).wrapping_shr(rhs as u32) as u64,
                    _ => rhs,
                };
                self.retire(next_pc)
            },
            DIV64_IMM | DIV64_REG | MOD64_IMM | MOD64_REG => {
                let rhs = self.alu64_rhs(insn);
                if rhs == 0 {
                    return Err(Fault::SigIll);
                }
                let lhs = self.reg[dst];
                self.reg[dst] = if matches!(insn.opc, DIV64_IMM | DIV64_REG) {
                    lhs / rhs
                } else {
                    lhs % rhs
                };
                self.retire(next_pc)
            },
            NEG64 => {
                if !version.enable_neg() {
                    return Err(Fault::SigIll);
                }
                self.reg[dst] = (self.reg[dst] as i64).wrapping_neg() as u64;
                self.retire(next_pc)
            },

            JA => self.retire(jump_target(pc, insn.off)),
            JEQ_IMM | JEQ_REG | JGT_IMM | JGT_REG | JGE_IMM | JGE_REG | JSET_IMM | JSET_REG
            | JNE_IMM | JNE_REG | JSGT_IMM | JSGT_REG | JSGE_IMM | JSGE_REG | JLT_IMM | JLT_REG
            | JLE_IMM | JLE_REG | JSLT_IMM | JSLT_REG | JSLE_IMM | JSLE_REG => {
                let lhs = self.reg[dst];
                let rhs = if insn.opc & 0x08 == 0 {
                    imm
                } else {
                    self.reg[src]
                };
                let taken = match insn.opc {
                    JEQ_IMM | JEQ_REG => lhs == rhs,
                    JGT_IMM | JGT_REG => lhs > rhs,
                    JGE_IMM | JGE_REG => lhs >= rhs,
                    JSET_IMM | JSET_REG => lhs & rhs != 0,
                    JNE_IMM | JNE_REG => lhs != rhs,
                    JSGT_IMM | JSGT_REG => (lhs as i64) > (rhs as i64),
                    JSGE_IMM | JSGE_REG => (lhs as i64) >= (rhs as i64),
                    JLT_IMM | JLT_REG => lhs < rhs,
                    JLE_IMM | JLE_REG => lhs <= rhs,
                    JSLT_IMM | JSLT_REG => (lhs as i64) < (rhs as i64),
                    _ => (lhs as i64) <= (rhs as i64),
                };
                let target = if taken {
                    jump_target(pc, insn.off)
                } else {
                    next_pc
                };
                self.retire(target)
            },

            CALL_IMM => match insn.src {
                CALL_SRC_SYSCALL => self.syscall(insn.imm as u32),
                CALL_SRC_INTERNAL => self.call(insn.imm as u32 as u64),
                _ => Err(Fault::SigIll),
            },
            CALL_REG => {
                let reg = if version.callx_uses_src_reg() {
                    src
                } else {
                    usize::try_from(insn.imm).map_err(|_| Fault::SigIll)?
                };
                if reg >= REG_CNT {
                    return Err(Fault::SigIll);
                }
                // Relocated with wrapping arithmetic; any address outside
                // text lands past `text_cnt` and faults there.
                let target = self.reg[reg]
                    .wrapping_sub(MM_PROGRAM_START)
                    .wrapping_sub(self.program.text_off())
                    / INSN_SIZE;
                self.call(target)
            },
            EXIT => {
                self.charge();
                match self.stack.pop(&mut self.reg) {
                    Some(return_pc) => Ok(Step::Next(return_pc)),
                    None => Ok(Step::Exit),
                }
            },

            _ => Err(Fault::SigIll),
        }
    }

    fn alu32_rhs(&self, insn: Instruction) -> u32 {
        if insn.opc & 0x08 == 0 {
            insn.imm as u32
        } else {
            self.reg[insn.src as usize] as u32
        }
    }

    fn alu64_rhs(&self, insn: Instruction) -> u64 {
        if insn.opc & 0x08 == 0 {
            sign_extend(insn.imm)
        } else {
            self.reg[insn.src as usize]
        }
    }

    /// Charges the call, pushes a frame and transfers control. A target
    /// outside text or without its calldests bit faults with `pc` already
    /// moved to it and the frame still pushed.
    fn call(&mut self, target: u64) -> Result<Step, Fault> {
        self.charge();
        self.stack.push(&mut self.reg, self.pc + 1)?;
        self.pc = target;
        if target >= self.program.text_cnt() {
            return Err(Fault::SigText);
        }
        if !self.program.is_call_dest(target) {
            return Err(Fault::SigCall);
        }
        Ok(Step::Next(target))
    }

    fn syscall(&mut self, hash: u32) -> Result<Step, Fault> {
        let syscalls = self.syscalls;
        let entry = syscalls.lookup(hash).ok_or(Fault::SigIll)?;
        self.charge();

        let mut args = [0u64; 5];
        args.copy_from_slice(&self.reg[1..6]);
        let version = self.program.sbpf_version();
        let mut ctx = SyscallContext::new(&mut self.reg, &mut self.memory, &mut self.cu, version);
        let value = (entry.function)(&mut ctx, args)?;
        self.reg[0] = value;
        Ok(Step::Next(self.pc + 1))
    }

    fn trace_memory(&mut self, vaddr: u64, sz: u64, access: AccessType, value: u64) {
        if let Some(trace) = self.trace.as_deref_mut() {
            let mask = if sz >= 8 {
                u64::MAX
            } else {
                (1u64 << (sz * 8)) - 1
            };
            trace.memory(vaddr, sz, access, value & mask);
        }
    }
}
