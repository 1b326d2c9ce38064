// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! The syscall heap.
//!
//! Allocation must match the reference runtime's bump allocator bit for bit:
//! round the current size up to the requested alignment, hand out the
//! address at that point, and advance by the requested size. Nothing is ever
//! freed; programs can observe the addresses returned, so the exact rounding
//! is part of consensus. The whole arena is reclaimed by [`HeapEmulator::reset`].

use crate::constants::MM_HEAP_START;

/// A region handed out by [`HeapEmulator::alloc`]. Only valid until the next
/// reset; stale handles are refused by the accessors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapAllocation {
    vaddr: u64,
    len: u64,
    generation: u32,
}

impl HeapAllocation {
    /// Virtual address of the first byte, as returned to the program.
    pub fn vaddr(&self) -> u64 {
        self.vaddr
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn host_range(&self) -> std::ops::Range<usize> {
        let start = (self.vaddr - MM_HEAP_START) as usize;
        start..start + self.len as usize
    }
}

#[derive(Debug)]
pub struct HeapEmulator {
    arena: Box<[u8]>,
    /// Bytes considered allocated, in `[0, heap_max]`.
    heap_sz: u64,
    generation: u32,
}

impl HeapEmulator {
    pub fn new(heap_max: u64) -> Self {
        Self {
            arena: vec![0u8; heap_max as usize].into_boxed_slice(),
            heap_sz: 0,
            generation: 0,
        }
    }

    pub fn heap_max(&self) -> u64 {
        self.arena.len() as u64
    }

    pub fn heap_sz(&self) -> u64 {
        self.heap_sz
    }

    /// Allocates `sz` bytes aligned to `align`. Returns `None`, leaving the
    /// heap untouched, when `align` is not a power of two or the arena cannot
    /// fit the allocation.
    pub fn alloc(&mut self, sz: u64, align: u64) -> Option<HeapAllocation> {
        if !align.is_power_of_two() {
            return None;
        }
        let start = self.heap_sz.checked_add(align - 1)? & !(align - 1);
        let end = start.saturating_add(sz);
        if end > self.heap_max() {
            return None;
        }
        self.heap_sz = end;
        Some(HeapAllocation {
            vaddr: MM_HEAP_START.saturating_add(start),
            len: sz,
            generation: self.generation,
        })
    }

    pub fn get(&self, allocation: &HeapAllocation) -> Option<&[u8]> {
        if allocation.generation != self.generation {
            return None;
        }
        self.arena.get(allocation.host_range())
    }

    pub fn get_mut(&mut self, allocation: &HeapAllocation) -> Option<&mut [u8]> {
        if allocation.generation != self.generation {
            return None;
        }
        self.arena.get_mut(allocation.host_range())
    }

    /// Frees every allocation at once and zeroes the arena.
    pub fn reset(&mut self) {
        self.arena.fill(0);
        self.heap_sz = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    pub(crate) fn arena(&self) -> &[u8] {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut [u8] {
        &mut self.arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_none, assert_some};

    #[test]
    fn test_bump_allocation_rounds_up() {
        let mut heap = HeapEmulator::new(64);
        let a = assert_some!(heap.alloc(3, 8));
        assert_eq!(a.vaddr(), MM_HEAP_START);
        assert_eq!(heap.heap_sz(), 3);

        let b = assert_some!(heap.alloc(5, 8));
        assert_eq!(b.vaddr(), MM_HEAP_START + 8);
        assert_eq!(heap.heap_sz(), 13);

        // Byte alignment never skips.
        let c = assert_some!(heap.alloc(1, 1));
        assert_eq!(c.vaddr(), MM_HEAP_START + 13);
    }

    #[test]
    fn test_exhaustion_leaves_heap_untouched() {
        let mut heap = HeapEmulator::new(32);
        assert_some!(heap.alloc(30, 1));
        assert_none!(heap.alloc(1, 8));
        assert_eq!(heap.heap_sz(), 30);
        let last = assert_some!(heap.alloc(2, 1));
        assert_eq!(last.vaddr(), MM_HEAP_START + 30);
        // A full heap still satisfies empty requests at its end.
        let empty = assert_some!(heap.alloc(0, 8));
        assert_eq!(empty.vaddr(), MM_HEAP_START + 32);
        assert_none!(heap.alloc(1, 1));
    }

    #[test]
    fn test_rejects_invalid_alignment() {
        let mut heap = HeapEmulator::new(16);
        assert_none!(heap.alloc(4, 0));
        assert_none!(heap.alloc(4, 3));
        assert_eq!(heap.heap_sz(), 0);
    }

    #[test]
    fn test_zero_sized_allocation() {
        let mut heap = HeapEmulator::new(16);
        let empty = assert_some!(heap.alloc(0, 8));
        assert!(empty.is_empty());
        assert_eq!(heap.heap_sz(), 0);
    }

    #[test]
    fn test_reset_invalidates_handles() {
        let mut heap = HeapEmulator::new(16);
        let a = assert_some!(heap.alloc(4, 1));
        assert_some!(heap.get_mut(&a)).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(heap.get(&a), Some(&[1u8, 2, 3, 4][..]));

        heap.reset();
        assert_none!(heap.get(&a));
        assert_eq!(heap.heap_sz(), 0);
        let b = assert_some!(heap.alloc(4, 1));
        assert_eq!(b.vaddr(), a.vaddr());
        assert_eq!(heap.get(&b), Some(&[0u8; 4][..]));
    }
}
