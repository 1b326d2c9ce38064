// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    constants::{INSN_SIZE, REGION_OFFSET_MASK},
    errors::{VmError, VmResult},
    version::SbpfVersion,
};
use bitvec::{order::Lsb0, vec::BitVec};

/// Bit per text word; a set bit marks a valid call destination.
pub type CallDests = BitVec<u64, Lsb0>;

/// A loaded program, as produced by the program loader. Immutable and
/// shareable between any number of concurrently running VM instances.
#[derive(Clone, Debug)]
pub struct Program<'a> {
    rodata: &'a [u8],
    /// Byte offset of the text words within `rodata`.
    text_off: u64,
    text_cnt: u64,
    entry_pc: u64,
    calldests: CallDests,
    sbpf_version: SbpfVersion,
    is_deprecated: bool,
}

impl<'a> Program<'a> {
    pub fn new(
        rodata: &'a [u8],
        text_off: u64,
        text_cnt: u64,
        entry_pc: u64,
        calldests: CallDests,
        sbpf_version: SbpfVersion,
        is_deprecated: bool,
    ) -> VmResult<Self> {
        if rodata.len() as u64 > REGION_OFFSET_MASK {
            return Err(VmError::invalid_argument(format!(
                "rodata of {} bytes does not fit the program region",
                rodata.len()
            )));
        }
        if text_off % INSN_SIZE != 0 {
            return Err(VmError::invalid_argument(format!(
                "text offset {} is not aligned to an instruction word",
                text_off
            )));
        }
        let text_end = text_cnt
            .checked_mul(INSN_SIZE)
            .and_then(|text_sz| text_sz.checked_add(text_off));
        match text_end {
            Some(text_end) if text_end <= rodata.len() as u64 => {},
            _ => {
                return Err(VmError::invalid_argument(format!(
                    "text [{}, +{} words) lies outside rodata of {} bytes",
                    text_off,
                    text_cnt,
                    rodata.len()
                )));
            },
        }
        if entry_pc >= text_cnt {
            return Err(VmError::invalid_argument(format!(
                "entry pc {} outside text of {} words",
                entry_pc, text_cnt
            )));
        }
        if (calldests.len() as u64) < text_cnt {
            return Err(VmError::invalid_argument(format!(
                "calldests covers {} words but text has {}",
                calldests.len(),
                text_cnt
            )));
        }

        Ok(Self {
            rodata,
            text_off,
            text_cnt,
            entry_pc,
            calldests,
            sbpf_version,
            is_deprecated,
        })
    }

    /// A program whose rodata is exactly its text, entered at `entry_pc`,
    /// with the given call destinations.
    pub fn from_text(
        text: &'a [u8],
        entry_pc: u64,
        call_targets: impl IntoIterator<Item = u64>,
        sbpf_version: SbpfVersion,
    ) -> VmResult<Self> {
        let text_cnt = text.len() as u64 / INSN_SIZE;
        let calldests = calldests_from_targets(text_cnt, call_targets)?;
        Self::new(text, 0, text_cnt, entry_pc, calldests, sbpf_version, false)
    }

    pub fn with_deprecated(mut self, is_deprecated: bool) -> Self {
        self.is_deprecated = is_deprecated;
        self
    }

    pub fn rodata(&self) -> &'a [u8] {
        self.rodata
    }

    pub fn text_off(&self) -> u64 {
        self.text_off
    }

    pub fn text_cnt(&self) -> u64 {
        self.text_cnt
    }

    pub fn entry_pc(&self) -> u64 {
        self.entry_pc
    }

    pub fn sbpf_version(&self) -> SbpfVersion {
        self.sbpf_version
    }

    pub fn is_deprecated(&self) -> bool {
        self.is_deprecated
    }

    /// Fetches the text word at `pc`, or `None` past the end of text.
    pub fn word(&self, pc: u64) -> Option<u64> {
        if pc >= self.text_cnt {
            return None;
        }
        let start = (self.text_off + pc * INSN_SIZE) as usize;
        let bytes = self.rodata.get(start..start + INSN_SIZE as usize)?;
        bytes.try_into().ok().map(u64::from_le_bytes)
    }

    pub fn is_call_dest(&self, pc: u64) -> bool {
        pc < self.text_cnt && self.calldests.get(pc as usize).is_some_and(|bit| *bit)
    }
}

/// Builds a calldests bitset for `text_cnt` words from explicit targets.
pub fn calldests_from_targets(
    text_cnt: u64,
    targets: impl IntoIterator<Item = u64>,
) -> VmResult<CallDests> {
    let mut calldests = CallDests::repeat(false, text_cnt as usize);
    for target in targets {
        if target >= text_cnt {
            return Err(VmError::invalid_argument(format!(
                "call destination {} outside text of {} words",
                target, text_cnt
            )));
        }
        calldests.set(target as usize, true);
    }
    Ok(calldests)
}
