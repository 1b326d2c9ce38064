// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! Static program validation.
//!
//! Validation is a load-time convenience: it rejects programs that could
//! only ever fault or that use instructions the program's version does not
//! have. The interpreter never relies on it and stays fully defensive.

use crate::{
    constants::{FRAME_PTR_REG, REG_CNT},
    instruction::{Instruction, opcodes::*},
    program::Program,
};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VerifierError {
    #[error("program has no instructions")]
    NoProgram,
    #[error("unknown opcode {opc:#04x} at pc {pc}")]
    UnknownOpcode { pc: u64, opc: u8 },
    #[error("lddw at pc {0} is the last instruction")]
    LddwCannotBeLast(u64),
    #[error("lddw at pc {0} is not followed by its second word")]
    IncompleteLddw(u64),
    #[error("jump at pc {pc} to {target} leaves the text")]
    JumpOutOfCode { pc: u64, target: i64 },
    #[error("jump at pc {pc} lands in the middle of the lddw at {target}")]
    JumpToMiddleOfLddw { pc: u64, target: u64 },
    #[error("call at pc {pc} to {target} leaves the text")]
    CallOutOfCode { pc: u64, target: u64 },
    #[error("invalid source register r{reg} at pc {pc}")]
    InvalidSourceRegister { pc: u64, reg: u8 },
    #[error("invalid destination register r{reg} at pc {pc}")]
    InvalidDestinationRegister { pc: u64, reg: u8 },
    #[error("unsupported endian width {width} at pc {pc}")]
    UnsupportedEndianWidth { pc: u64, width: i32 },
    #[error("division by zero at pc {0}")]
    DivisionByZero(u64),
    #[error("shift by {shift} at pc {pc} is out of range")]
    ShiftOutOfRange { pc: u64, shift: i32 },
}

fn check_src(pc: u64, insn: &Instruction) -> Result<(), VerifierError> {
    if insn.src as usize >= REG_CNT {
        return Err(VerifierError::InvalidSourceRegister { pc, reg: insn.src });
    }
    Ok(())
}

/// Registers an instruction may read through `dst`: `r0`..`r10`.
fn check_dst_read(pc: u64, insn: &Instruction) -> Result<(), VerifierError> {
    if insn.dst as usize >= REG_CNT {
        return Err(VerifierError::InvalidDestinationRegister { pc, reg: insn.dst });
    }
    Ok(())
}

/// Registers an instruction may write: `r0`..`r9`.
fn check_dst_write(pc: u64, insn: &Instruction) -> Result<(), VerifierError> {
    if insn.dst as usize >= FRAME_PTR_REG {
        return Err(VerifierError::InvalidDestinationRegister { pc, reg: insn.dst });
    }
    Ok(())
}

fn check_shift(pc: u64, insn: &Instruction, bits: i32) -> Result<(), VerifierError> {
    if !(0..bits).contains(&insn.imm) {
        return Err(VerifierError::ShiftOutOfRange {
            pc,
            shift: insn.imm,
        });
    }
    Ok(())
}

fn is_imm_variant(insn: &Instruction) -> bool {
    insn.opc & 0x08 == 0
}

/// Validates every instruction of `program` against its version.
pub fn validate(program: &Program<'_>) -> Result<(), VerifierError> {
    let version = program.sbpf_version();
    let text_cnt = program.text_cnt();
    if text_cnt == 0 {
        return Err(VerifierError::NoProgram);
    }

    let insns: Vec<Instruction> = (0..text_cnt)
        .filter_map(|pc| program.word(pc).map(Instruction::decode))
        .collect();

    // Second words of lddw instructions; never valid jump targets.
    let mut lddw_tail = vec![false; insns.len()];
    let mut pc = 0;
    while pc < insns.len() {
        if insns[pc].opc == LDDW && version.enable_lddw() {
            if pc + 1 >= insns.len() {
                return Err(VerifierError::LddwCannotBeLast(pc as u64));
            }
            lddw_tail[pc + 1] = true;
            pc += 2;
        } else {
            pc += 1;
        }
    }

    let check_jump = |pc: u64, off: i16| -> Result<(), VerifierError> {
        let target = pc as i64 + off as i64 + 1;
        if target < 0 || target >= text_cnt as i64 {
            return Err(VerifierError::JumpOutOfCode { pc, target });
        }
        if lddw_tail[target as usize] {
            return Err(VerifierError::JumpToMiddleOfLddw {
                pc,
                target: target as u64 - 1,
            });
        }
        Ok(())
    };

    for (idx, insn) in insns.iter().enumerate() {
        if lddw_tail[idx] {
            continue;
        }
        let pc = idx as u64;
        let unknown = || VerifierError::UnknownOpcode { pc, opc: insn.opc };
        match insn.opc {
            LDDW => {
                if !version.enable_lddw() {
                    return Err(unknown());
                }
                if insns[idx + 1].opc != 0 {
                    return Err(VerifierError::IncompleteLddw(pc));
                }
                check_dst_write(pc, insn)?;
            },
            LDXB | LDXH | LDXW | LDXDW => {
                check_src(pc, insn)?;
                check_dst_write(pc, insn)?;
            },
            STB | STH | STW | STDW => check_dst_read(pc, insn)?,
            STXB | STXH | STXW | STXDW => {
                check_src(pc, insn)?;
                check_dst_read(pc, insn)?;
            },

            NEG32 | NEG64 => {
                if !version.enable_neg() {
                    return Err(unknown());
                }
                check_dst_write(pc, insn)?;
            },
            LE | BE => {
                if insn.opc == LE && !version.enable_le() {
                    return Err(unknown());
                }
                if !matches!(insn.imm, 16 | 32 | 64) {
                    return Err(VerifierError::UnsupportedEndianWidth {
                        pc,
                        width: insn.imm,
                    });
                }
                check_dst_write(pc, insn)?;
            },
            ADD64_IMM if insn.dst as usize == FRAME_PTR_REG => {
                if !version.dynamic_stack_frames() {
                    return Err(VerifierError::InvalidDestinationRegister { pc, reg: insn.dst });
                }
            },
            ADD32_IMM | ADD32_REG | SUB32_IMM | SUB32_REG | MUL32_IMM | MUL32_REG | DIV32_IMM
            | DIV32_REG | OR32_IMM | OR32_REG | AND32_IMM | AND32_REG | LSH32_IMM | LSH32_REG
            | RSH32_IMM | RSH32_REG | MOD32_IMM | MOD32_REG | XOR32_IMM | XOR32_REG
            | MOV32_IMM | MOV32_REG | ARSH32_IMM | ARSH32_REG | ADD64_IMM | ADD64_REG
            | SUB64_IMM | SUB64_REG | MUL64_IMM | MUL64_REG | DIV64_IMM | DIV64_REG | OR64_IMM
            | OR64_REG | AND64_IMM | AND64_REG | LSH64_IMM | LSH64_REG | RSH64_IMM | RSH64_REG
            | MOD64_IMM | MOD64_REG | XOR64_IMM | XOR64_REG | MOV64_IMM | MOV64_REG
            | ARSH64_IMM | ARSH64_REG => {
                check_dst_write(pc, insn)?;
                if !is_imm_variant(insn) {
                    check_src(pc, insn)?;
                    continue;
                }
                match insn.opc {
                    DIV32_IMM | MOD32_IMM | DIV64_IMM | MOD64_IMM if insn.imm == 0 => {
                        return Err(VerifierError::DivisionByZero(pc));
                    },
                    LSH32_IMM | RSH32_IMM | ARSH32_IMM => check_shift(pc, insn, 32)?,
                    LSH64_IMM | RSH64_IMM | ARSH64_IMM => check_shift(pc, insn, 64)?,
                    _ => {},
                }
            },

            JA => check_jump(pc, insn.off)?,
            JEQ_IMM | JEQ_REG | JGT_IMM | JGT_REG | JGE_IMM | JGE_REG | JSET_IMM | JSET_REG
            | JNE_IMM | JNE_REG | JSGT_IMM | JSGT_REG | JSGE_IMM | JSGE_REG | JLT_IMM | JLT_REG
            | JLE_IMM | JLE_REG | JSLT_IMM | JSLT_REG | JSLE_IMM | JSLE_REG => {
                check_dst_read(pc, insn)?;
                if !is_imm_variant(insn) {
                    check_src(pc, insn)?;
                }
                check_jump(pc, insn.off)?;
            },
            CALL_IMM => match insn.src {
                CALL_SRC_SYSCALL => {},
                CALL_SRC_INTERNAL => {
                    let target = insn.imm as u32 as u64;
                    if target >= text_cnt {
                        return Err(VerifierError::CallOutOfCode { pc, target });
                    }
                },
                _ => return Err(VerifierError::InvalidSourceRegister { pc, reg: insn.src }),
            },
            CALL_REG => {
                let reg = if version.callx_uses_src_reg() {
                    insn.src as i64
                } else {
                    insn.imm as i64
                };
                if !(0..REG_CNT as i64).contains(&reg) {
                    return Err(VerifierError::InvalidSourceRegister {
                        pc,
                        reg: reg.clamp(0, u8::MAX as i64) as u8,
                    });
                }
            },
            EXIT => {},
            _ => return Err(unknown()),
        }
    }
    Ok(())
}
