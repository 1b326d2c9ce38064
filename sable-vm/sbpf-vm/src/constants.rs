// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! Fixed parameters of the sBPF execution environment.

/// Number of registers visible to programs (`r0`..`r10`).
pub const REG_CNT: usize = 11;
/// Size of the register file. Register fields are 4 bits wide, so any
/// index a malformed instruction can name lands inside the file.
pub const REG_MAX: usize = 16;
/// The read-only frame pointer.
pub const FRAME_PTR_REG: usize = 10;
/// First argument register, set to the start of the input region on entry.
pub const INPUT_PTR_REG: usize = 1;

/// Size in bytes of one instruction word.
pub const INSN_SIZE: u64 = 8;

/// Number of virtual memory regions.
pub const REGION_CNT: usize = 6;
/// Virtual addresses are split into a region index (upper bits) and an offset.
pub const REGION_VADDR_BITS: u32 = 32;
pub const REGION_OFFSET_MASK: u64 = (1 << REGION_VADDR_BITS) - 1;

pub const MM_PROGRAM_START: u64 = 1 << REGION_VADDR_BITS;
pub const MM_STACK_START: u64 = 2 << REGION_VADDR_BITS;
pub const MM_HEAP_START: u64 = 3 << REGION_VADDR_BITS;
pub const MM_INPUT_START: u64 = 4 << REGION_VADDR_BITS;

/// Hard upper bound on call depth; the configured depth may be lower.
pub const STACK_FRAME_MAX: u64 = 64;
/// Bytes of program-visible stack per call frame.
pub const STACK_FRAME_SZ: u64 = 0x1000;
/// Unmapped bytes preceding every frame when frames have a fixed size.
pub const STACK_GUARD_SZ: u64 = 0x1000;

pub const HEAP_DEFAULT: u64 = 32 * 1024;
pub const HEAP_MAX: u64 = 256 * 1024;

pub const COMPUTE_UNIT_LIMIT: u64 = 1_400_000;

/// Compute units charged for executing any single instruction.
pub const INSTRUCTION_COST: u64 = 1;

/// Alignment the heap allocator applies when alignment checks are enabled.
pub const HEAP_ALIGN: u64 = 8;
