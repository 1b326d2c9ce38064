// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! The sBPF virtual machine.
//!
//! A [`Vm`] runs one program to completion against a software-enforced memory
//! sandbox. Every abnormal termination is reported as a [`Fault`] value: the
//! interpreter never panics on program input, and the compute budget is the
//! only way to bound a run.
//!
//! The pieces, leaves first:
//! - [`memory`]: the six-entry region table and the fragmented input resolver.
//! - [`stack`]: shadow call frames and the guarded program stack.
//! - [`heap`]: the bump allocator exposed to syscalls.
//! - the interpreter: fetch, decode, execute and compute metering.
//! - [`syscalls`]: the shared, immutable syscall registry and handler context.
//! - [`trace`]: optional per-instruction trace recording.

pub mod constants;
pub mod errors;
pub mod heap;
pub mod instruction;
mod interpreter;
pub mod logging;
pub mod memory;
pub mod program;
pub mod stack;
pub mod syscalls;
pub mod trace;
pub mod verifier;
pub mod version;
mod vm;

pub use errors::{Fault, VmError, VmResult};
pub use memory::{AccessType, AccountRegionMeta, InputMemory, InputRegion, SegvRecord};
pub use program::Program;
pub use syscalls::{SyscallContext, SyscallFunction, SyscallRegistry, make_syscall};
pub use trace::{TraceBuffer, TraceEvent, TraceSink};
pub use version::SbpfVersion;
pub use vm::{ExecOutcome, ExecReport, Vm, VmParams};
