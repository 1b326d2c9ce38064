// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! Execution tracing.
//!
//! A [`TraceSink`] observes a run; it cannot influence it. The interpreter
//! reports every instruction before executing it and every successful load
//! or store after performing it.

use crate::{constants::REG_CNT, memory::AccessType};
use serde::Serialize;

pub trait TraceSink {
    /// Called before the instruction at `pc` executes.
    fn instruction(&mut self, pc: u64, ic: u64, cu: u64, regs: &[u64; REG_CNT]);

    /// Called after a successful data access.
    fn memory(&mut self, _vaddr: u64, _sz: u64, _access: AccessType, _value: u64) {}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    Instruction {
        pc: u64,
        ic: u64,
        cu: u64,
        regs: [u64; REG_CNT],
    },
    Memory {
        vaddr: u64,
        sz: u64,
        access: AccessType,
        value: u64,
    },
}

/// Records up to `event_max` events. Once full, further events are dropped
/// and [`TraceBuffer::overflowed`] reports it.
#[derive(Clone, Debug)]
pub struct TraceBuffer {
    events: Vec<TraceEvent>,
    event_max: usize,
    overflowed: bool,
}

impl TraceBuffer {
    pub fn new(event_max: usize) -> Self {
        Self {
            events: Vec::with_capacity(event_max.min(4096)),
            event_max,
            overflowed: false,
        }
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.overflowed = false;
    }

    fn push(&mut self, event: TraceEvent) {
        if self.events.len() >= self.event_max {
            self.overflowed = true;
            return;
        }
        self.events.push(event);
    }
}

impl TraceSink for TraceBuffer {
    fn instruction(&mut self, pc: u64, ic: u64, cu: u64, regs: &[u64; REG_CNT]) {
        self.push(TraceEvent::Instruction {
            pc,
            ic,
            cu,
            regs: *regs,
        });
    }

    fn memory(&mut self, vaddr: u64, sz: u64, access: AccessType, value: u64) {
        self.push(TraceEvent::Memory {
            vaddr,
            sz,
            access,
            value,
        });
    }
}
