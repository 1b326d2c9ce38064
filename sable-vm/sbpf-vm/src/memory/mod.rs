// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! Virtual address translation.
//!
//! The 64-bit virtual address space is split into six regions by the bits
//! above [`REGION_VADDR_BITS`]:
//!
//! | index | region  | load limit          | store limit  |
//! |-------|---------|---------------------|--------------|
//! | 0     | null    | 0                   | 0            |
//! | 1     | program | rodata length       | 0            |
//! | 2     | stack   | virtual stack size  | same         |
//! | 3     | heap    | heap arena size     | same         |
//! | 4     | input   | input region size   | same         |
//! | 5     | high    | 0                   | 0            |
//!
//! Every address at or above region 5 lands in region 5.

mod input;

pub use input::{AccountRegionMeta, HostMemory, InputLocation, InputMemory, InputRegion};

use crate::{
    constants::{REGION_CNT, REGION_OFFSET_MASK, REGION_VADDR_BITS},
    errors::Fault,
    heap::HeapEmulator,
    stack::StackLayout,
};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Load,
    Store,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Load => write!(f, "load"),
            AccessType::Store => write!(f, "store"),
        }
    }
}

/// The last failed translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SegvRecord {
    pub vaddr: u64,
    pub sz: u64,
    pub access: AccessType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Region {
    Null,
    Program,
    Stack,
    Heap,
    Input,
    High,
}

impl Region {
    pub const ALL: [Region; REGION_CNT] = [
        Region::Null,
        Region::Program,
        Region::Stack,
        Region::Heap,
        Region::Input,
        Region::High,
    ];

    pub fn of(vaddr: u64) -> Self {
        let idx = (vaddr >> REGION_VADDR_BITS).min(REGION_CNT as u64 - 1);
        Self::ALL[idx as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionLimits {
    pub load: u64,
    pub store: u64,
}

impl RegionLimits {
    fn read_only(len: u64) -> Self {
        Self {
            load: len,
            store: 0,
        }
    }

    fn read_write(len: u64) -> Self {
        Self {
            load: len,
            store: len,
        }
    }

    fn get(&self, access: AccessType) -> u64 {
        match access {
            AccessType::Load => self.load,
            AccessType::Store => self.store,
        }
    }
}

/// Where a translated access lives on the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HostSpan {
    Program(usize),
    Stack(usize),
    Heap(usize),
    Input(InputLocation),
}

/// The address space of one VM instance.
pub struct MemoryMapping<'a> {
    limits: [RegionLimits; REGION_CNT],
    rodata: &'a [u8],
    stack: Box<[u8]>,
    stack_layout: StackLayout,
    heap: HeapEmulator,
    input: InputMemory<'a>,
    check_align: bool,
    segv: Option<SegvRecord>,
}

impl fmt::Debug for MemoryMapping<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMapping")
            .field("limits", &self.limits)
            .field("stack_layout", &self.stack_layout)
            .field("heap_sz", &self.heap.heap_sz())
            .field("input_fragmented", &self.input.is_fragmented())
            .field("check_align", &self.check_align)
            .field("segv", &self.segv)
            .finish()
    }
}

impl<'a> MemoryMapping<'a> {
    pub fn new(
        rodata: &'a [u8],
        stack_layout: StackLayout,
        heap_max: u64,
        input: InputMemory<'a>,
        check_align: bool,
    ) -> Self {
        let mut limits = [RegionLimits::default(); REGION_CNT];
        limits[Region::Program.index()] = RegionLimits::read_only(rodata.len() as u64);
        limits[Region::Stack.index()] = RegionLimits::read_write(stack_layout.virtual_size());
        limits[Region::Heap.index()] = RegionLimits::read_write(heap_max);
        limits[Region::Input.index()] = RegionLimits::read_write(input.size());
        Self {
            limits,
            rodata,
            stack: vec![0u8; stack_layout.host_size() as usize].into_boxed_slice(),
            stack_layout,
            heap: HeapEmulator::new(heap_max),
            input,
            check_align,
            segv: None,
        }
    }

    pub fn limits(&self, region: Region) -> RegionLimits {
        self.limits[region.index()]
    }

    pub fn check_align(&self) -> bool {
        self.check_align
    }

    /// The most recent failed translation, if any.
    pub fn segv(&self) -> Option<SegvRecord> {
        self.segv
    }

    pub fn heap(&self) -> &HeapEmulator {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut HeapEmulator {
        &mut self.heap
    }

    /// Host bytes of the program stack, frame 0 first.
    pub fn stack_bytes(&self) -> &[u8] {
        &self.stack
    }

    pub fn input(&self) -> &InputMemory<'a> {
        &self.input
    }

    /// Zeroes the stack and heap, frees every heap allocation and clears the
    /// fault record. Input memory is owned by the caller and left untouched.
    pub fn reset(&mut self) {
        self.stack.fill(0);
        self.heap.reset();
        self.segv = None;
    }

    fn translate(
        &mut self,
        vaddr: u64,
        sz: u64,
        access: AccessType,
        align: bool,
    ) -> Result<HostSpan, Fault> {
        let result = self.translate_inner(vaddr, sz, access, align);
        if result.is_err() {
            self.segv = Some(SegvRecord { vaddr, sz, access });
        }
        result
    }

    fn translate_inner(
        &self,
        vaddr: u64,
        sz: u64,
        access: AccessType,
        align: bool,
    ) -> Result<HostSpan, Fault> {
        if align && self.check_align && sz > 1 && vaddr % sz != 0 {
            return Err(Fault::SigSegv);
        }
        let region = Region::of(vaddr);
        let offset = vaddr & REGION_OFFSET_MASK;
        let end = offset.checked_add(sz).ok_or(Fault::SigSegv)?;
        let limits = self.limits(region);
        if end > limits.get(access) {
            // In bounds for loads but not for stores: the mapping is read-only.
            if access == AccessType::Store && end <= limits.load {
                return Err(Fault::SigRdOnly);
            }
            return Err(Fault::SigSegv);
        }
        match region {
            Region::Program => Ok(HostSpan::Program(offset as usize)),
            Region::Stack => self
                .stack_layout
                .to_host(offset, sz)
                .map(|host| HostSpan::Stack(host as usize))
                .ok_or(Fault::SigSegv),
            Region::Heap => Ok(HostSpan::Heap(offset as usize)),
            Region::Input => self.input.resolve(offset, sz, access).map(HostSpan::Input),
            Region::Null | Region::High => Err(Fault::SigSegv),
        }
    }

    fn host_bytes(&self, span: HostSpan, len: usize) -> Option<&[u8]> {
        match span {
            HostSpan::Program(start) => self.rodata.get(start..start.checked_add(len)?),
            HostSpan::Stack(start) => self.stack.get(start..start.checked_add(len)?),
            HostSpan::Heap(start) => self.heap.arena().get(start..start.checked_add(len)?),
            HostSpan::Input(location) => self.input.bytes(location, len),
        }
    }

    fn host_bytes_mut(&mut self, span: HostSpan, len: usize) -> Option<&mut [u8]> {
        match span {
            HostSpan::Program(_) => None,
            HostSpan::Stack(start) => self.stack.get_mut(start..start.checked_add(len)?),
            HostSpan::Heap(start) => self
                .heap
                .arena_mut()
                .get_mut(start..start.checked_add(len)?),
            HostSpan::Input(location) => self.input.bytes_mut(location, len),
        }
    }

    /// Loads a little-endian value of `sz` bytes (1, 2, 4 or 8).
    pub fn load(&mut self, vaddr: u64, sz: u64) -> Result<u64, Fault> {
        let span = self.translate(vaddr, sz, AccessType::Load, true)?;
        let bytes = self.host_bytes(span, sz as usize).ok_or(Fault::SigSegv)?;
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Stores the low `sz` bytes (1, 2, 4 or 8) of `value`, little-endian.
    pub fn store(&mut self, vaddr: u64, sz: u64, value: u64) -> Result<(), Fault> {
        let span = self.translate(vaddr, sz, AccessType::Store, true)?;
        let bytes = self
            .host_bytes_mut(span, sz as usize)
            .ok_or(Fault::SigSegv)?;
        bytes.copy_from_slice(&value.to_le_bytes()[..sz as usize]);
        Ok(())
    }

    /// Translates `len` bytes for reading. The range must lie within one
    /// region (and one input fragment). Empty ranges always succeed.
    pub fn slice(&mut self, vaddr: u64, len: u64) -> Result<&[u8], Fault> {
        if len == 0 {
            return Ok(&[]);
        }
        let span = self.translate(vaddr, len, AccessType::Load, false)?;
        self.host_bytes(span, len as usize).ok_or(Fault::SigSegv)
    }

    /// Translates `len` bytes for writing.
    pub fn slice_mut(&mut self, vaddr: u64, len: u64) -> Result<&mut [u8], Fault> {
        if len == 0 {
            return Ok(&mut []);
        }
        let span = self.translate(vaddr, len, AccessType::Store, false)?;
        self.host_bytes_mut(span, len as usize).ok_or(Fault::SigSegv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{
        MM_HEAP_START, MM_INPUT_START, MM_PROGRAM_START, MM_STACK_START, STACK_FRAME_SZ,
        STACK_GUARD_SZ,
    };
    use claims::{assert_err_eq, assert_matches, assert_ok, assert_ok_eq, assert_some_eq};
    use proptest::prelude::*;
    use test_case::test_case;

    const RODATA: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

    fn mapping<'a>(input: InputMemory<'a>, check_align: bool) -> MemoryMapping<'a> {
        MemoryMapping::new(&RODATA, StackLayout::new(2, true), 1024, input, check_align)
    }

    #[test_case(0 => Region::Null)]
    #[test_case(MM_PROGRAM_START => Region::Program)]
    #[test_case(MM_STACK_START + 5 => Region::Stack)]
    #[test_case(MM_HEAP_START - 1 => Region::Stack)]
    #[test_case(MM_INPUT_START => Region::Input)]
    #[test_case(5 << 32 => Region::High)]
    #[test_case(u64::MAX => Region::High)]
    fn test_region_of(vaddr: u64) -> Region {
        Region::of(vaddr)
    }

    #[test]
    fn test_rodata_loads_and_read_only_stores() {
        let mut memory = mapping(InputMemory::default(), true);
        assert_ok_eq!(memory.load(MM_PROGRAM_START, 4), 0x0403_0201);
        assert_ok_eq!(memory.load(MM_PROGRAM_START + 8, 8), 0x100f_0e0d_0c0b_0a09);
        assert_err_eq!(memory.store(MM_PROGRAM_START, 1, 0), Fault::SigRdOnly);
        assert_some_eq!(
            memory.segv(),
            SegvRecord {
                vaddr: MM_PROGRAM_START,
                sz: 1,
                access: AccessType::Store
            }
        );
        // Past the end of rodata: no more specific classification.
        assert_err_eq!(memory.store(MM_PROGRAM_START + 16, 1, 0), Fault::SigSegv);
        assert_err_eq!(memory.load(MM_PROGRAM_START + 12, 8), Fault::SigSegv);
    }

    #[test]
    fn test_stack_guards() {
        let mut memory = mapping(InputMemory::default(), true);
        // Guard of frame 0.
        assert_err_eq!(memory.load(MM_STACK_START, 8), Fault::SigSegv);
        let top = MM_STACK_START + STACK_GUARD_SZ + STACK_FRAME_SZ;
        assert_ok!(memory.store(top - 8, 8, 0xdead_beef));
        assert_ok_eq!(memory.load(top - 8, 8), 0xdead_beef);
        assert_eq!(&memory.stack_bytes()[0xff8..0xffc], &[0xef, 0xbe, 0xad, 0xde]);
        // Guard of frame 1.
        assert_err_eq!(memory.store(top, 8, 0), Fault::SigSegv);
    }

    #[test]
    fn test_alignment_check() {
        let mut memory = mapping(InputMemory::default(), true);
        assert_err_eq!(memory.load(MM_HEAP_START + 1, 4), Fault::SigSegv);
        assert_ok!(memory.load(MM_HEAP_START + 1, 1));

        let mut memory = mapping(InputMemory::default(), false);
        assert_ok!(memory.store(MM_HEAP_START + 3, 8, 0x0102));
        assert_ok_eq!(memory.load(MM_HEAP_START + 3, 2), 0x0102);
    }

    #[test]
    fn test_heap_limit_is_arena_size() {
        let mut memory = mapping(InputMemory::default(), true);
        assert_ok!(memory.store(MM_HEAP_START + 1016, 8, 1));
        assert_err_eq!(memory.store(MM_HEAP_START + 1024, 8, 1), Fault::SigSegv);
    }

    #[test]
    fn test_read_only_input_fragment() {
        let data = [0u8; 8];
        let input = assert_ok!(InputMemory::fragmented(
            vec![InputRegion::readonly(0, &data, true)],
            vec![],
        ));
        let mut memory = mapping(input, true);
        assert_ok_eq!(memory.load(MM_INPUT_START, 8), 0);
        assert_err_eq!(memory.store(MM_INPUT_START + 4, 4, 1), Fault::SigRdOnly);
        assert_matches!(memory.segv(), Some(SegvRecord { vaddr, .. }) if vaddr == MM_INPUT_START + 4);
    }

    #[test]
    fn test_slices() {
        let mut memory = mapping(InputMemory::default(), true);
        assert_ok_eq!(memory.slice(0, 0), &[0u8; 0][..]);
        assert_eq!(assert_ok!(memory.slice(MM_PROGRAM_START + 1, 3)), &[2, 3, 4]);
        assert_err_eq!(memory.slice_mut(MM_PROGRAM_START, 3).map(|_| ()), Fault::SigRdOnly);
        assert_ok!(memory.slice_mut(MM_HEAP_START + 1, 7)).fill(0xaa);
        assert_ok_eq!(memory.load(MM_HEAP_START, 8), 0xaaaa_aaaa_aaaa_aa00);
        assert_err_eq!(memory.slice(0, 1).map(|_| ()), Fault::SigSegv);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut memory = mapping(InputMemory::default(), true);
        assert_ok!(memory.store(MM_HEAP_START, 8, u64::MAX));
        assert_err_eq!(memory.load(0, 1), Fault::SigSegv);
        memory.reset();
        assert_eq!(memory.segv(), None);
        assert_ok_eq!(memory.load(MM_HEAP_START, 8), 0);
    }

    proptest! {
        #[test]
        fn unmapped_regions_always_fault(
            offset in 0u64..(1 << 32),
            high in prop_oneof![Just(0u64), 5u64..u64::MAX >> 32],
            sz in prop_oneof![Just(1u64), Just(2), Just(4), Just(8)],
            value: u64,
        ) {
            let vaddr = (high << 32) | offset;
            let mut memory = mapping(InputMemory::default(), false);
            prop_assert_eq!(memory.load(vaddr, sz), Err(Fault::SigSegv));
            prop_assert_eq!(memory.store(vaddr, sz, value), Err(Fault::SigSegv));
        }

        #[test]
        fn rodata_stores_are_read_only(
            offset in 0u64..16,
            sz in prop_oneof![Just(1u64), Just(2), Just(4), Just(8)],
        ) {
            prop_assume!(offset + sz <= 16);
            let mut memory = mapping(InputMemory::default(), false);
            prop_assert!(memory.load(MM_PROGRAM_START + offset, sz).is_ok());
            prop_assert_eq!(memory.store(MM_PROGRAM_START + offset, sz, 0), Err(Fault::SigRdOnly));
        }

        #[test]
        fn fragmented_matches_contiguous(
            cuts in proptest::collection::btree_set(1usize..64, 0..6),
            ops in proptest::collection::vec(
                (0u64..72, prop_oneof![Just(1u64), Just(2), Just(4), Just(8)], any::<u64>(), any::<bool>()),
                1..32,
            ),
        ) {
            let seed: Vec<u8> = (0..64u8).collect();

            let mut flat = seed.clone();
            let mut fragments_backing = seed.clone();
            let mut bounds: Vec<usize> = cuts.into_iter().collect();
            bounds.insert(0, 0);
            bounds.push(64);

            let mut regions = Vec::new();
            let mut rest: &mut [u8] = &mut fragments_backing;
            for pair in bounds.windows(2) {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(pair[1] - pair[0]);
                regions.push(InputRegion::writable(pair[0] as u64, head, true));
                rest = tail;
            }

            let contiguous = InputMemory::contiguous(&mut flat).unwrap();
            let fragmented = InputMemory::fragmented(regions, vec![]).unwrap();
            let mut a = mapping(contiguous, false);
            let mut b = mapping(fragmented, false);
            for (offset, sz, value, is_store) in ops {
                let vaddr = MM_INPUT_START + offset;
                let in_one_fragment = bounds
                    .windows(2)
                    .any(|w| offset >= w[0] as u64 && offset + sz <= w[1] as u64);
                if is_store {
                    let ra = a.store(vaddr, sz, value);
                    let rb = b.store(vaddr, sz, value);
                    if in_one_fragment {
                        prop_assert_eq!(ra, rb);
                    } else {
                        prop_assert_eq!(rb, Err(Fault::SigSegv));
                        // Keep the two images in sync.
                        if ra.is_ok() {
                            for i in 0..sz {
                                let byte = (value >> (8 * i)) as u8;
                                let _ = b.store(vaddr + i, 1, byte as u64);
                            }
                        }
                    }
                } else {
                    let ra = a.load(vaddr, sz);
                    let rb = b.load(vaddr, sz);
                    if in_one_fragment {
                        prop_assert_eq!(ra, rb);
                    } else {
                        prop_assert_eq!(rb, Err(Fault::SigSegv));
                    }
                }
            }
            drop(a);
            drop(b);
            prop_assert_eq!(flat, fragments_backing);
        }
    }
}
