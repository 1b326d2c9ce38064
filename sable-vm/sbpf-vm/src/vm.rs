// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    constants::{
        COMPUTE_UNIT_LIMIT, FRAME_PTR_REG, HEAP_DEFAULT, HEAP_MAX, INPUT_PTR_REG, MM_INPUT_START,
        REG_CNT, REG_MAX, STACK_FRAME_MAX,
    },
    errors::{Fault, VmError, VmResult},
    logging::{LogEntry, LogSchema},
    memory::{InputMemory, MemoryMapping, SegvRecord},
    program::Program,
    stack::{CallStack, StackLayout},
    syscalls::SyscallRegistry,
    trace::TraceSink,
};
use sable_config::config::VmConfig;
use serde::Serialize;
use std::fmt;

/// Per-run limits of a VM instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmParams {
    /// Compute units available when the run starts.
    pub entry_cu: u64,
    /// Size of the heap arena in bytes.
    pub heap_max: u64,
    /// Maximum call depth.
    pub frame_max: u64,
    /// Whether the input region may be backed by multiple fragments.
    pub direct_mapping: bool,
}

impl Default for VmParams {
    fn default() -> Self {
        Self {
            entry_cu: COMPUTE_UNIT_LIMIT,
            heap_max: HEAP_DEFAULT,
            frame_max: STACK_FRAME_MAX,
            direct_mapping: false,
        }
    }
}

impl VmParams {
    /// Derives the run limits from a (sanitized) node VM config.
    pub fn from_config(config: &VmConfig) -> Self {
        Self {
            entry_cu: config.compute_unit_limit,
            heap_max: config.heap_size,
            frame_max: config.max_call_depth,
            direct_mapping: config.direct_mapping,
        }
    }

    fn validate(&self, input: &InputMemory<'_>) -> VmResult<()> {
        if self.heap_max > HEAP_MAX {
            return Err(VmError::invalid_argument(format!(
                "heap of {} bytes exceeds the maximum of {}",
                self.heap_max, HEAP_MAX
            )));
        }
        if self.frame_max == 0 || self.frame_max > STACK_FRAME_MAX {
            return Err(VmError::invalid_argument(format!(
                "call depth {} must be in [1, {}]",
                self.frame_max, STACK_FRAME_MAX
            )));
        }
        if input.is_fragmented() && !self.direct_mapping {
            return Err(VmError::invalid_argument(
                "fragmented input requires direct mapping",
            ));
        }
        Ok(())
    }
}

/// Terminal classification of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExecOutcome {
    Success,
    Fault(Fault),
}

impl fmt::Display for ExecOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecOutcome::Success => write!(f, "success"),
            ExecOutcome::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

/// Summary of a finished run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ExecReport {
    pub outcome: ExecOutcome,
    pub pc: u64,
    pub ic: u64,
    /// Compute units left.
    pub cu: u64,
    /// Call depth at the moment the run terminated.
    pub frame_cnt: u64,
    /// `r0` at termination.
    pub return_value: u64,
    pub segv: Option<SegvRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    Ready,
    Finished(ExecReport),
}

/// One program execution.
///
/// Construction validates every argument and leaves the instance ready to
/// run. [`Vm::exec`] may be called once; [`Vm::reset`] rearms the instance
/// for another run of the same program over the same input.
pub struct Vm<'a> {
    pub(crate) program: &'a Program<'a>,
    pub(crate) syscalls: &'a SyscallRegistry,
    params: VmParams,
    pub(crate) reg: [u64; REG_MAX],
    pub(crate) pc: u64,
    pub(crate) ic: u64,
    pub(crate) cu: u64,
    pub(crate) stack: CallStack,
    pub(crate) memory: MemoryMapping<'a>,
    pub(crate) trace: Option<&'a mut dyn TraceSink>,
    state: RunState,
}

impl fmt::Debug for Vm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("params", &self.params)
            .field("reg", &&self.reg[..REG_CNT])
            .field("pc", &self.pc)
            .field("ic", &self.ic)
            .field("cu", &self.cu)
            .field("frame_cnt", &self.stack.frame_cnt())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> Vm<'a> {
    pub fn new(
        program: &'a Program<'a>,
        syscalls: &'a SyscallRegistry,
        params: VmParams,
        input: InputMemory<'a>,
        trace: Option<&'a mut dyn TraceSink>,
    ) -> VmResult<Self> {
        if let Err(error) = params.validate(&input) {
            LogSchema::new(LogEntry::VmInit)
                .error(&error)
                .sbpf_version(program.sbpf_version())
                .warn();
            return Err(error);
        }

        let layout = StackLayout::new(
            params.frame_max,
            !program.sbpf_version().dynamic_stack_frames(),
        );
        let memory = MemoryMapping::new(
            program.rodata(),
            layout,
            params.heap_max,
            input,
            !program.is_deprecated(),
        );
        let mut vm = Self {
            program,
            syscalls,
            params,
            reg: [0; REG_MAX],
            pc: 0,
            ic: 0,
            cu: 0,
            stack: CallStack::new(layout),
            memory,
            trace,
            state: RunState::Ready,
        };
        vm.rearm();
        Ok(vm)
    }

    fn rearm(&mut self) {
        self.reg = [0; REG_MAX];
        self.reg[INPUT_PTR_REG] = MM_INPUT_START;
        self.reg[FRAME_PTR_REG] = self.stack.layout().initial_frame_ptr();
        self.pc = self.program.entry_pc();
        self.ic = 0;
        self.cu = self.params.entry_cu;
        self.stack.unwind();
        self.state = RunState::Ready;
    }

    /// Restores the entry state: registers, counters, an empty call stack, a
    /// zeroed stack and heap. Heap allocations handed out earlier go stale.
    pub fn reset(&mut self) {
        self.memory.reset();
        self.rearm();
        LogSchema::new(LogEntry::Reset)
            .entry_pc(self.pc)
            .debug();
    }

    /// Runs the program until it exits or faults.
    pub fn exec(&mut self) -> VmResult<()> {
        if self.state != RunState::Ready {
            return Err(VmError::NotReady);
        }

        let result = self.interpret();
        let frame_cnt = self.stack.frame_cnt();
        self.stack.unwind();

        let outcome = match result {
            Ok(()) => ExecOutcome::Success,
            Err(fault) => ExecOutcome::Fault(fault),
        };
        let report = ExecReport {
            outcome,
            pc: self.pc,
            ic: self.ic,
            cu: self.cu,
            frame_cnt,
            return_value: self.reg[0],
            segv: self.memory.segv(),
        };
        self.state = RunState::Finished(report);

        let schema = LogSchema::new(LogEntry::Execute)
            .sbpf_version(self.program.sbpf_version())
            .entry_pc(self.program.entry_pc())
            .pc(report.pc)
            .ic(report.ic)
            .cu_consumed(self.params.entry_cu.saturating_sub(report.cu))
            .frame_cnt(frame_cnt)
            .segv(report.segv);
        match result {
            Ok(()) => {
                schema.message("program exited").debug();
                Ok(())
            },
            Err(fault) => {
                let error = VmError::Fault(fault);
                schema.error(&error).message("program faulted").debug();
                Err(error)
            },
        }
    }

    /// The report of the last run, or `None` if the instance has not run
    /// since construction or the last reset.
    pub fn report(&self) -> Option<ExecReport> {
        match self.state {
            RunState::Ready => None,
            RunState::Finished(report) => Some(report),
        }
    }

    pub fn params(&self) -> VmParams {
        self.params
    }

    pub fn program(&self) -> &'a Program<'a> {
        self.program
    }

    /// Program-visible registers `r0`..`r10`.
    pub fn registers(&self) -> &[u64] {
        &self.reg[..REG_CNT]
    }

    /// Program-visible register `idx`, or `None` past `r10`.
    pub fn reg(&self, idx: usize) -> Option<u64> {
        self.registers().get(idx).copied()
    }

    /// Sets a register before the run, e.g. to pass extra arguments.
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

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn ic(&self) -> u64 {
        self.ic
    }

    pub fn cu(&self) -> u64 {
        self.cu
    }

    pub fn frame_cnt(&self) -> u64 {
        self.stack.frame_cnt()
    }

    pub fn segv(&self) -> Option<SegvRecord> {
        self.memory.segv()
    }

    pub fn memory(&self) -> &MemoryMapping<'a> {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryMapping<'a> {
        &mut self.memory
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }
}
