// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! Syscall dispatch.
//!
//! Syscalls are identified by the murmur3-32 hash of their symbol name. The
//! registry is built once, is immutable afterwards, and is shared (by
//! reference) between every VM instance running on any thread.

use crate::{
    constants::{REG_CNT, REG_MAX},
    errors::{Fault, VmError, VmResult},
    heap::HeapEmulator,
    memory::MemoryMapping,
    version::SbpfVersion,
};
use std::{collections::HashMap, fmt, sync::Arc};

/// A syscall handler. Receives `r1`..`r5` and returns the value for `r0`, or
/// the fault that ends the run.
pub type UnboxedSyscallFunction =
    dyn Fn(&mut SyscallContext<'_, '_>, [u64; 5]) -> Result<u64, Fault> + Send + Sync + 'static;

pub type SyscallFunction = Arc<UnboxedSyscallFunction>;

/// Wraps a handler closure into a [`SyscallFunction`].
pub fn make_syscall<F>(function: F) -> SyscallFunction
where
    F: Fn(&mut SyscallContext<'_, '_>, [u64; 5]) -> Result<u64, Fault> + Send + Sync + 'static,
{
    Arc::new(function)
}

/// Hashes a syscall symbol name to the identifier carried by `call imm`.
pub fn hash_symbol_name(name: &[u8]) -> u32 {
    murmur3_32(name, 0)
}

fn murmur3_32(key: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mix = |k: u32| k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    let mut h = seed;
    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= mix(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .rev()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
        h ^= mix(k);
    }

    h ^= key.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

#[derive(Clone)]
pub struct RegisteredSyscall {
    pub name: Box<str>,
    pub function: SyscallFunction,
}

impl fmt::Debug for RegisteredSyscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredSyscall")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SyscallRegistry {
    entries: HashMap<u32, RegisteredSyscall>,
}

impl SyscallRegistry {
    /// Builds the registry. Fails if two names hash to the same identifier.
    pub fn new<S, I>(syscalls: I) -> VmResult<Self>
    where
        S: Into<Box<str>>,
        I: IntoIterator<Item = (S, SyscallFunction)>,
    {
        let mut entries: HashMap<u32, RegisteredSyscall> = HashMap::new();
        for (name, function) in syscalls {
            let name: Box<str> = name.into();
            let hash = hash_symbol_name(name.as_bytes());
            if let Some(existing) = entries.get(&hash) {
                return Err(VmError::DuplicateSyscall {
                    name: if existing.name == name {
                        name.into_string()
                    } else {
                        format!("{} (collides with {})", name, existing.name)
                    },
                    hash,
                });
            }
            entries.insert(hash, RegisteredSyscall { name, function });
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, hash: u32) -> Option<&RegisteredSyscall> {
        self.entries.get(&hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a syscall handler may touch: the registers, the address space
/// (including the heap) and the compute meter.
pub struct SyscallContext<'r, 'm> {
    reg: &'r mut [u64; REG_MAX],
    memory: &'r mut MemoryMapping<'m>,
    cu: &'r mut u64,
    sbpf_version: SbpfVersion,
}

impl<'r, 'm> SyscallContext<'r, 'm> {
    pub fn new(
        reg: &'r mut [u64; REG_MAX],
        memory: &'r mut MemoryMapping<'m>,
        cu: &'r mut u64,
        sbpf_version: SbpfVersion,
    ) -> Self {
        Self {
            reg,
            memory,
            cu,
            sbpf_version,
        }
    }

    /// Charges `units` compute units. On exhaustion the meter drops to zero
    /// and the run ends with [`Fault::SigCost`].
    pub fn consume(&mut self, units: u64) -> Result<(), Fault> {
        match self.cu.checked_sub(units) {
            Some(remaining) => {
                *self.cu = remaining;
                Ok(())
            },
            None => {
                *self.cu = 0;
                Err(Fault::SigCost)
            },
        }
    }

    pub fn remaining_cu(&self) -> u64 {
        *self.cu
    }

    pub fn sbpf_version(&self) -> SbpfVersion {
        self.sbpf_version
    }

    /// Whether the program runs with alignment checks.
    pub fn check_align(&self) -> bool {
        self.memory.check_align()
    }

    /// Program-visible register `idx`, or `None` past `r10`.
    pub fn reg(&self, idx: usize) -> Option<u64> {
        self.reg[..REG_CNT].get(idx).copied()
    }

    pub fn set_reg(&mut self, idx: usize, value: u64) -> VmResult<()> {
        match self.reg[..REG_CNT].get_mut(idx) {
            Some(reg) => {
                *reg = value;
                Ok(())
            },
            None => Err(VmError::invalid_argument(format!(
                "register r{} does not exist",
                idx
            ))),
        }
    }

    pub fn memory(&mut self) -> &mut MemoryMapping<'m> {
        self.memory
    }

    pub fn slice(&mut self, vaddr: u64, len: u64) -> Result<&[u8], Fault> {
        self.memory.slice(vaddr, len)
    }

    pub fn slice_mut(&mut self, vaddr: u64, len: u64) -> Result<&mut [u8], Fault> {
        self.memory.slice_mut(vaddr, len)
    }

    pub fn heap_mut(&mut self) -> &mut HeapEmulator {
        self.memory.heap_mut()
    }
}
