// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! Call stack management.
//!
//! Two parallel structures: the shadow stack, holding what programs must not
//! see (callee-saved registers and return addresses), and the byte-addressed
//! program stack mapped at [`MM_STACK_START`].
//!
//! With fixed-size frames every frame is preceded in virtual address space by
//! an unmapped guard of [`STACK_GUARD_SZ`] bytes, so running off the bottom of
//! a frame faults instead of corrupting the caller. Guards are not backed by
//! host memory.

use crate::{
    constants::{FRAME_PTR_REG, MM_STACK_START, REG_MAX, STACK_FRAME_SZ, STACK_GUARD_SZ},
    errors::Fault,
};

/// First callee-saved register.
const SAVED_REG_FIRST: usize = 6;
/// Number of callee-saved registers (`r6`..`r10`).
pub const SAVED_REG_CNT: usize = 5;

/// Frame metadata invisible to program code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShadowFrame {
    /// `r6`, `r7`, `r8`, `r9` and `r10` of the caller.
    pub saved_regs: [u64; SAVED_REG_CNT],
    pub return_pc: u64,
}

/// Geometry of the program stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackLayout {
    frame_max: u64,
    guarded: bool,
}

impl StackLayout {
    pub fn new(frame_max: u64, guarded: bool) -> Self {
        Self { frame_max, guarded }
    }

    pub fn frame_max(&self) -> u64 {
        self.frame_max
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    /// Frames backed by memory: the entry frame plus one per nested call.
    pub fn frame_cnt(&self) -> u64 {
        self.frame_max + 1
    }

    /// Virtual bytes spanned by one frame, guard included.
    pub fn slot_size(&self) -> u64 {
        if self.guarded {
            STACK_GUARD_SZ + STACK_FRAME_SZ
        } else {
            STACK_FRAME_SZ
        }
    }

    pub fn virtual_size(&self) -> u64 {
        self.frame_cnt() * self.slot_size()
    }

    pub fn host_size(&self) -> u64 {
        self.frame_cnt() * STACK_FRAME_SZ
    }

    /// Value of `r10` when a run starts: the top of the entry frame when
    /// frames are fixed, the top of the whole stack when they are dynamic.
    pub fn initial_frame_ptr(&self) -> u64 {
        if self.guarded {
            MM_STACK_START + self.slot_size()
        } else {
            MM_STACK_START + self.host_size()
        }
    }

    /// Maps an in-bounds virtual stack offset to a host offset. Fails when the
    /// access starts in a guard or runs past the end of its frame.
    pub fn to_host(&self, offset: u64, len: u64) -> Option<u64> {
        if !self.guarded {
            return Some(offset);
        }
        let slot = offset / self.slot_size();
        let within = offset % self.slot_size();
        if within < STACK_GUARD_SZ || within.saturating_add(len) > self.slot_size() {
            return None;
        }
        Some(slot * STACK_FRAME_SZ + (within - STACK_GUARD_SZ))
    }
}

/// The shadow stack. `frame_cnt` shadow frames are live; `frame_cnt` never
/// exceeds the configured maximum.
#[derive(Debug)]
pub struct CallStack {
    layout: StackLayout,
    shadow: Box<[ShadowFrame]>,
    frame_cnt: u64,
}

impl CallStack {
    pub fn new(layout: StackLayout) -> Self {
        Self {
            layout,
            shadow: vec![ShadowFrame::default(); layout.frame_max() as usize].into_boxed_slice(),
            frame_cnt: 0,
        }
    }

    pub fn layout(&self) -> StackLayout {
        self.layout
    }

    pub fn frame_cnt(&self) -> u64 {
        self.frame_cnt
    }

    /// Live shadow frames, bottom first.
    pub fn frames(&self) -> &[ShadowFrame] {
        &self.shadow[..self.frame_cnt as usize]
    }

    /// Saves the callee-saved registers and `return_pc`, then moves the frame
    /// pointer to the next frame (fixed-size frames only).
    pub fn push(&mut self, reg: &mut [u64; REG_MAX], return_pc: u64) -> Result<(), Fault> {
        let slot = self
            .shadow
            .get_mut(self.frame_cnt as usize)
            .ok_or(Fault::SigStack)?;
        slot.saved_regs
            .copy_from_slice(&reg[SAVED_REG_FIRST..SAVED_REG_FIRST + SAVED_REG_CNT]);
        slot.return_pc = return_pc;
        self.frame_cnt += 1;
        if !self.layout.guarded {
            return Ok(());
        }
        reg[FRAME_PTR_REG] = reg[FRAME_PTR_REG].wrapping_add(self.layout.slot_size());
        Ok(())
    }

    /// Restores the callee-saved registers of the innermost frame and returns
    /// its return address, or `None` at depth zero.
    pub fn pop(&mut self, reg: &mut [u64; REG_MAX]) -> Option<u64> {
        let top = self.frame_cnt.checked_sub(1)?;
        let frame = self.shadow[top as usize];
        reg[SAVED_REG_FIRST..SAVED_REG_FIRST + SAVED_REG_CNT].copy_from_slice(&frame.saved_regs);
        self.frame_cnt = top;
        Some(frame.return_pc)
    }

    /// Drops every live frame. Frame contents are left in place.
    pub fn unwind(&mut self) {
        self.frame_cnt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err_eq, assert_none, assert_ok};

    #[test]
    fn test_guarded_translation() {
        let layout = StackLayout::new(2, true);
        assert_eq!(layout.virtual_size(), 3 * 0x2000);
        assert_eq!(layout.host_size(), 3 * 0x1000);
        // The guard of frame 0.
        assert_none!(layout.to_host(0, 1));
        assert_none!(layout.to_host(0xfff, 1));
        assert_eq!(layout.to_host(0x1000, 8), Some(0));
        assert_eq!(layout.to_host(0x1ff8, 8), Some(0xff8));
        // Straddles the end of frame 0 into the guard of frame 1.
        assert_none!(layout.to_host(0x1ffc, 8));
        assert_eq!(layout.to_host(0x3000, 4), Some(0x1000));
    }

    #[test]
    fn test_unguarded_translation() {
        let layout = StackLayout::new(2, false);
        assert_eq!(layout.to_host(0xffc, 8), Some(0xffc));
        assert_eq!(layout.initial_frame_ptr(), MM_STACK_START + 3 * 0x1000);
    }

    #[test]
    fn test_push_pop_restores_registers() {
        let mut stack = CallStack::new(StackLayout::new(4, true));
        let mut reg = [0u64; REG_MAX];
        for (i, r) in reg.iter_mut().enumerate() {
            *r = i as u64 * 100;
        }
        reg[FRAME_PTR_REG] = stack.layout().initial_frame_ptr();
        let saved = reg;

        assert_ok!(stack.push(&mut reg, 42));
        assert_eq!(stack.frame_cnt(), 1);
        assert_eq!(reg[FRAME_PTR_REG], saved[FRAME_PTR_REG] + 0x2000);

        reg[6] = 1;
        reg[9] = 2;
        reg[FRAME_PTR_REG] = 3;
        assert_eq!(stack.pop(&mut reg), Some(42));
        assert_eq!(reg, saved);
        assert_eq!(stack.frame_cnt(), 0);
        assert_none!(stack.pop(&mut reg));
    }

    #[test]
    fn test_push_past_maximum() {
        let mut stack = CallStack::new(StackLayout::new(2, false));
        let mut reg = [0u64; REG_MAX];
        assert_ok!(stack.push(&mut reg, 1));
        assert_ok!(stack.push(&mut reg, 2));
        assert_err_eq!(stack.push(&mut reg, 3), Fault::SigStack);
        assert_eq!(stack.frame_cnt(), 2);
        assert_eq!(stack.frames()[1].return_pc, 2);
        // Dynamic frames leave the frame pointer to the program.
        assert_eq!(reg[FRAME_PTR_REG], 0);
    }
}
