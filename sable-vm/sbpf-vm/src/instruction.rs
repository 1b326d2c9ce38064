// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! sBPF instruction encoding.
//!
//! An instruction word is a little-endian `u64`:
//!
//! ```text
//! bits  0..8   opcode
//! bits  8..12  destination register
//! bits 12..16  source register
//! bits 16..32  signed offset
//! bits 32..64  signed immediate
//! ```
//!
//! `lddw` is the only two-word instruction; the second word carries the
//! upper 32 bits of the immediate.

pub mod opcodes {
    pub const CLS_LD: u8 = 0x00;
    pub const CLS_LDX: u8 = 0x01;
    pub const CLS_ST: u8 = 0x02;
    pub const CLS_STX: u8 = 0x03;
    pub const CLS_ALU: u8 = 0x04;
    pub const CLS_JMP: u8 = 0x05;
    pub const CLS_ALU64: u8 = 0x07;

    pub const LDDW: u8 = 0x18;

    pub const LDXB: u8 = 0x71;
    pub const LDXH: u8 = 0x69;
    pub const LDXW: u8 = 0x61;
    pub const LDXDW: u8 = 0x79;

    pub const STB: u8 = 0x72;
    pub const STH: u8 = 0x6a;
    pub const STW: u8 = 0x62;
    pub const STDW: u8 = 0x7a;

    pub const STXB: u8 = 0x73;
    pub const STXH: u8 = 0x6b;
    pub const STXW: u8 = 0x63;
    pub const STXDW: u8 = 0x7b;

    pub const ADD32_IMM: u8 = 0x04;
    pub const ADD32_REG: u8 = 0x0c;
    pub const SUB32_IMM: u8 = 0x14;
    pub const SUB32_REG: u8 = 0x1c;
    pub const MUL32_IMM: u8 = 0x24;
    pub const MUL32_REG: u8 = 0x2c;
    pub const DIV32_IMM: u8 = 0x34;
    pub const DIV32_REG: u8 = 0x3c;
    pub const OR32_IMM: u8 = 0x44;
    pub const OR32_REG: u8 = 0x4c;
    pub const AND32_IMM: u8 = 0x54;
    pub const AND32_REG: u8 = 0x5c;
    pub const LSH32_IMM: u8 = 0x64;
    pub const LSH32_REG: u8 = 0x6c;
    pub const RSH32_IMM: u8 = 0x74;
    pub const RSH32_REG: u8 = 0x7c;
    pub const NEG32: u8 = 0x84;
    pub const MOD32_IMM: u8 = 0x94;
    pub const MOD32_REG: u8 = 0x9c;
    pub const XOR32_IMM: u8 = 0xa4;
    pub const XOR32_REG: u8 = 0xac;
    pub const MOV32_IMM: u8 = 0xb4;
    pub const MOV32_REG: u8 = 0xbc;
    pub const ARSH32_IMM: u8 = 0xc4;
    pub const ARSH32_REG: u8 = 0xcc;
    pub const LE: u8 = 0xd4;
    pub const BE: u8 = 0xdc;

    pub const ADD64_IMM: u8 = 0x07;
    pub const ADD64_REG: u8 = 0x0f;
    pub const SUB64_IMM: u8 = 0x17;
    pub const SUB64_REG: u8 = 0x1f;
    pub const MUL64_IMM: u8 = 0x27;
    pub const MUL64_REG: u8 = 0x2f;
    pub const DIV64_IMM: u8 = 0x37;
    pub const DIV64_REG: u8 = 0x3f;
    pub const OR64_IMM: u8 = 0x47;
    pub const OR64_REG: u8 = 0x4f;
    pub const AND64_IMM: u8 = 0x57;
    pub const AND64_REG: u8 = 0x5f;
    pub const LSH64_IMM: u8 = 0x67;
    pub const LSH64_REG: u8 = 0x6f;
    pub const RSH64_IMM: u8 = 0x77;
    pub const RSH64_REG: u8 = 0x7f;
    pub const NEG64: u8 = 0x87;
    pub const MOD64_IMM: u8 = 0x97;
    pub const MOD64_REG: u8 = 0x9f;
    pub const XOR64_IMM: u8 = 0xa7;
    pub const XOR64_REG: u8 = 0xaf;
    pub const MOV64_IMM: u8 = 0xb7;
    pub const MOV64_REG: u8 = 0xbf;
    pub const ARSH64_IMM: u8 = 0xc7;
    pub const ARSH64_REG: u8 = 0xcf;

    pub const JA: u8 = 0x05;
    pub const JEQ_IMM: u8 = 0x15;
    pub const JEQ_REG: u8 = 0x1d;
    pub const JGT_IMM: u8 = 0x25;
    pub const JGT_REG: u8 = 0x2d;
    pub const JGE_IMM: u8 = 0x35;
    pub const JGE_REG: u8 = 0x3d;
    pub const JSET_IMM: u8 = 0x45;
    pub const JSET_REG: u8 = 0x4d;
    pub const JNE_IMM: u8 = 0x55;
    pub const JNE_REG: u8 = 0x5d;
    pub const JSGT_IMM: u8 = 0x65;
    pub const JSGT_REG: u8 = 0x6d;
    pub const JSGE_IMM: u8 = 0x75;
    pub const JSGE_REG: u8 = 0x7d;
    pub const CALL_IMM: u8 = 0x85;
    pub const CALL_REG: u8 = 0x8d;
    pub const EXIT: u8 = 0x95;
    pub const JLT_IMM: u8 = 0xa5;
    pub const JLT_REG: u8 = 0xad;
    pub const JLE_IMM: u8 = 0xb5;
    pub const JLE_REG: u8 = 0xbd;
    pub const JSLT_IMM: u8 = 0xc5;
    pub const JSLT_REG: u8 = 0xcd;
    pub const JSLE_IMM: u8 = 0xd5;
    pub const JSLE_REG: u8 = 0xdd;

    /// `src` value of `call imm` selecting a syscall (by hash).
    pub const CALL_SRC_SYSCALL: u8 = 0;
    /// `src` value of `call imm` selecting an internal function (by instruction index).
    pub const CALL_SRC_INTERNAL: u8 = 1;
}

use opcodes::*;

/// A decoded instruction word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Instruction {
    pub opc: u8,
    pub dst: u8,
    pub src: u8,
    pub off: i16,
    pub imm: i32,
}

impl Instruction {
    pub const fn new(opc: u8, dst: u8, src: u8, off: i16, imm: i32) -> Self {
        Self {
            opc,
            dst,
            src,
            off,
            imm,
        }
    }

    pub const fn decode(word: u64) -> Self {
        Self {
            opc: word as u8,
            dst: ((word >> 8) & 0xf) as u8,
            src: ((word >> 12) & 0xf) as u8,
            off: (word >> 16) as u16 as i16,
            imm: (word >> 32) as u32 as i32,
        }
    }

    pub const fn encode(&self) -> u64 {
        (self.opc as u64)
            | (((self.dst & 0xf) as u64) << 8)
            | (((self.src & 0xf) as u64) << 12)
            | ((self.off as u16 as u64) << 16)
            | ((self.imm as u32 as u64) << 32)
    }

    /// Opcode class (the low three bits).
    pub const fn class(&self) -> u8 {
        self.opc & 0x07
    }

    pub const fn alu_imm(opc: u8, dst: u8, imm: i32) -> Self {
        Self::new(opc, dst, 0, 0, imm)
    }

    pub const fn alu_reg(opc: u8, dst: u8, src: u8) -> Self {
        Self::new(opc, dst, src, 0, 0)
    }

    pub const fn mov64_imm(dst: u8, imm: i32) -> Self {
        Self::alu_imm(MOV64_IMM, dst, imm)
    }

    pub const fn add64_imm(dst: u8, imm: i32) -> Self {
        Self::alu_imm(ADD64_IMM, dst, imm)
    }

    /// `lddw dst, imm` as its two words.
    pub const fn lddw(dst: u8, imm: u64) -> [Self; 2] {
        [
            Self::new(LDDW, dst, 0, 0, imm as u32 as i32),
            Self::new(0, 0, 0, 0, (imm >> 32) as u32 as i32),
        ]
    }

    pub const fn ldx(opc: u8, dst: u8, src: u8, off: i16) -> Self {
        Self::new(opc, dst, src, off, 0)
    }

    pub const fn st(opc: u8, dst: u8, off: i16, imm: i32) -> Self {
        Self::new(opc, dst, 0, off, imm)
    }

    pub const fn stx(opc: u8, dst: u8, src: u8, off: i16) -> Self {
        Self::new(opc, dst, src, off, 0)
    }

    pub const fn ja(off: i16) -> Self {
        Self::new(JA, 0, 0, off, 0)
    }

    pub const fn jmp_imm(opc: u8, dst: u8, imm: i32, off: i16) -> Self {
        Self::new(opc, dst, 0, off, imm)
    }

    pub const fn jmp_reg(opc: u8, dst: u8, src: u8, off: i16) -> Self {
        Self::new(opc, dst, src, off, 0)
    }

    /// Call the function starting at instruction index `target_pc`.
    pub const fn call(target_pc: u32) -> Self {
        Self::new(CALL_IMM, 0, CALL_SRC_INTERNAL, 0, target_pc as i32)
    }

    /// Call the syscall registered under `hash`.
    pub const fn syscall(hash: u32) -> Self {
        Self::new(CALL_IMM, 0, CALL_SRC_SYSCALL, 0, hash as i32)
    }

    /// Indirect call through `reg`, encoded for the given version.
    pub const fn callx(reg: u8, uses_src_reg: bool) -> Self {
        if uses_src_reg {
            Self::new(CALL_REG, 0, reg, 0, 0)
        } else {
            Self::new(CALL_REG, 0, 0, 0, reg as i32)
        }
    }

    pub const fn exit() -> Self {
        Self::new(EXIT, 0, 0, 0, 0)
    }
}

/// Encodes a sequence of instructions into text words.
pub fn assemble(instructions: &[Instruction]) -> Vec<u64> {
    instructions.iter().map(Instruction::encode).collect()
}

/// Serializes text words into the little-endian byte image used as rodata.
pub fn words_to_bytes(words: &[u64]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// Size in bytes of a load/store opcode's access, or `None` for other opcodes.
pub const fn mem_access_size(opc: u8) -> Option<u64> {
    match opc {
        LDXB | STB | STXB => Some(1),
        LDXH | STH | STXH => Some(2),
        LDXW | STW | STXW => Some(4),
        LDXDW | STDW | STXDW => Some(8),
        _ => None,
    }
}
