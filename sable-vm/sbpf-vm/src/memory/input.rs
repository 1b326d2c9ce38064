// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! The input region.
//!
//! Either one contiguous buffer, or (with direct mapping) an ordered list of
//! fragments, each backed by its own host buffer with its own write
//! permission. Fragments are sorted by virtual offset and never overlap, so
//! an offset is resolved with a binary search. An access must fit entirely
//! inside one fragment, even when the next fragment happens to follow it
//! directly in host memory.

use crate::{
    constants::REGION_OFFSET_MASK,
    errors::{Fault, VmError, VmResult},
    memory::AccessType,
};

/// Host memory backing one input fragment.
#[derive(Debug)]
pub enum HostMemory<'a> {
    ReadOnly(&'a [u8]),
    Writable(&'a mut [u8]),
}

impl HostMemory<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            HostMemory::ReadOnly(bytes) => bytes,
            HostMemory::Writable(bytes) => bytes,
        }
    }
}

#[derive(Debug)]
pub struct InputRegion<'a> {
    /// Offset of the first byte from the start of the input region.
    vaddr_offset: u64,
    memory: HostMemory<'a>,
    /// Original account data or its resize buffer, as opposed to serialized
    /// metadata.
    is_acct_data: bool,
}

impl<'a> InputRegion<'a> {
    pub fn readonly(vaddr_offset: u64, bytes: &'a [u8], is_acct_data: bool) -> Self {
        Self {
            vaddr_offset,
            memory: HostMemory::ReadOnly(bytes),
            is_acct_data,
        }
    }

    pub fn writable(vaddr_offset: u64, bytes: &'a mut [u8], is_acct_data: bool) -> Self {
        Self {
            vaddr_offset,
            memory: HostMemory::Writable(bytes),
            is_acct_data,
        }
    }

    pub fn vaddr_offset(&self) -> u64 {
        self.vaddr_offset
    }

    pub fn len(&self) -> u64 {
        self.memory.bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One past the last virtual offset covered by this fragment. Saturates
    /// for fragments that [`InputMemory::fragmented`] would reject.
    pub fn end(&self) -> u64 {
        self.vaddr_offset.saturating_add(self.len())
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.memory, HostMemory::Writable(_))
    }

    pub fn is_acct_data(&self) -> bool {
        self.is_acct_data
    }

    pub fn bytes(&self) -> &[u8] {
        self.memory.bytes()
    }

    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.memory {
            HostMemory::ReadOnly(_) => None,
            HostMemory::Writable(bytes) => Some(bytes),
        }
    }
}

/// Maps an instruction account to its fragments in the input region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountRegionMeta {
    /// Index of the account's data fragment.
    pub region_idx: u32,
    pub has_data_region: bool,
    pub has_resizing_region: bool,
    /// Offset of the account's metadata from the start of the input region,
    /// excluding any leading duplicate-account marker.
    pub metadata_region_offset: u64,
    pub original_data_len: u64,
}

/// Location of a resolved access: fragment index and byte offset within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputLocation {
    pub fragment: usize,
    pub start: usize,
}

#[derive(Debug)]
pub enum InputMemory<'a> {
    Contiguous(&'a mut [u8]),
    Fragmented {
        regions: Vec<InputRegion<'a>>,
        accounts: Vec<AccountRegionMeta>,
    },
}

impl Default for InputMemory<'_> {
    fn default() -> Self {
        InputMemory::Contiguous(Default::default())
    }
}

impl<'a> InputMemory<'a> {
    pub fn contiguous(bytes: &'a mut [u8]) -> VmResult<Self> {
        if bytes.len() as u64 > REGION_OFFSET_MASK {
            return Err(VmError::invalid_argument(format!(
                "input of {} bytes does not fit the input region",
                bytes.len()
            )));
        }
        Ok(InputMemory::Contiguous(bytes))
    }

    /// Builds a fragmented input region. Fragments must be sorted by virtual
    /// offset and must not overlap; account metas must name existing fragments.
    pub fn fragmented(
        regions: Vec<InputRegion<'a>>,
        accounts: Vec<AccountRegionMeta>,
    ) -> VmResult<Self> {
        let mut prev_end = 0;
        for (idx, region) in regions.iter().enumerate() {
            if region.vaddr_offset() < prev_end {
                return Err(VmError::invalid_argument(format!(
                    "input fragment {} at offset {} overlaps or precedes the previous one ending at {}",
                    idx,
                    region.vaddr_offset(),
                    prev_end
                )));
            }
            prev_end = match region.vaddr_offset().checked_add(region.len()) {
                Some(end) => end,
                None => {
                    return Err(VmError::invalid_argument(format!(
                        "input fragment {} at offset {} overflows the address space",
                        idx,
                        region.vaddr_offset()
                    )));
                },
            };
            if prev_end > REGION_OFFSET_MASK {
                return Err(VmError::invalid_argument(format!(
                    "input fragment {} ends at {}, past the input region",
                    idx, prev_end
                )));
            }
        }
        for (idx, account) in accounts.iter().enumerate() {
            if account.has_data_region && account.region_idx as usize >= regions.len() {
                return Err(VmError::invalid_argument(format!(
                    "account {} names data fragment {} of {}",
                    idx,
                    account.region_idx,
                    regions.len()
                )));
            }
        }
        Ok(InputMemory::Fragmented { regions, accounts })
    }

    pub fn is_fragmented(&self) -> bool {
        matches!(self, InputMemory::Fragmented { .. })
    }

    /// Virtual size of the input region (end of the last fragment).
    pub fn size(&self) -> u64 {
        match self {
            InputMemory::Contiguous(bytes) => bytes.len() as u64,
            InputMemory::Fragmented { regions, .. } => regions.last().map_or(0, InputRegion::end),
        }
    }

    pub fn fragments(&self) -> &[InputRegion<'a>] {
        match self {
            InputMemory::Contiguous(_) => &[],
            InputMemory::Fragmented { regions, .. } => regions,
        }
    }

    pub fn account_meta(&self, account_idx: usize) -> Option<&AccountRegionMeta> {
        match self {
            InputMemory::Contiguous(_) => None,
            InputMemory::Fragmented { accounts, .. } => accounts.get(account_idx),
        }
    }

    /// The data fragment of an instruction account, if it has one.
    pub fn account_data_region(&self, account_idx: usize) -> Option<&InputRegion<'a>> {
        let meta = self.account_meta(account_idx)?;
        if !meta.has_data_region {
            return None;
        }
        self.fragments().get(meta.region_idx as usize)
    }

    /// Resolves `[offset, offset + sz)` to a single fragment.
    pub fn resolve(
        &self,
        offset: u64,
        sz: u64,
        access: AccessType,
    ) -> Result<InputLocation, Fault> {
        let regions = match self {
            InputMemory::Contiguous(bytes) => {
                if offset.saturating_add(sz) > bytes.len() as u64 {
                    return Err(Fault::SigSegv);
                }
                return Ok(InputLocation {
                    fragment: 0,
                    start: offset as usize,
                });
            },
            InputMemory::Fragmented { regions, .. } => regions,
        };

        let idx = regions.partition_point(|region| region.end() <= offset);
        let region = regions.get(idx).ok_or(Fault::SigSegv)?;
        if offset < region.vaddr_offset() {
            return Err(Fault::SigSegv);
        }
        if access == AccessType::Store && !region.is_writable() {
            return Err(Fault::SigRdOnly);
        }
        if offset.saturating_add(sz) > region.end() {
            return Err(Fault::SigSegv);
        }
        Ok(InputLocation {
            fragment: idx,
            start: (offset - region.vaddr_offset()) as usize,
        })
    }

    pub(crate) fn bytes(&self, location: InputLocation, len: usize) -> Option<&[u8]> {
        let bytes: &[u8] = match self {
            InputMemory::Contiguous(bytes) => bytes,
            InputMemory::Fragmented { regions, .. } => regions.get(location.fragment)?.bytes(),
        };
        bytes.get(location.start..location.start.checked_add(len)?)
    }

    pub(crate) fn bytes_mut(&mut self, location: InputLocation, len: usize) -> Option<&mut [u8]> {
        let bytes: &mut [u8] = match self {
            InputMemory::Contiguous(bytes) => bytes,
            InputMemory::Fragmented { regions, .. } => {
                regions.get_mut(location.fragment)?.bytes_mut()?
            },
        };
        bytes.get_mut(location.start..location.start.checked_add(len)?)
    }
}
