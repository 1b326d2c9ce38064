// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use thiserror::Error;

/// Classified abnormal termination of a run.
///
/// Two conforming implementations always agree on *whether* a run faulted,
/// but may disagree on *which* fault near the compute budget boundary. The
/// kind is diagnostic only and must not feed consensus-visible decisions.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash, Serialize)]
pub enum Fault {
    /// The program counter left the text region.
    #[error("SIGTEXT: program counter outside the text region")]
    SigText,
    /// A multi-word instruction was split by the end of the text region.
    #[error("SIGSPLIT: multi-word instruction crosses the end of the text region")]
    SigSplit,
    /// A call targeted a location that is not a function entry point.
    #[error("SIGCALL: call target is not a valid function")]
    SigCall,
    /// The call depth limit was exceeded.
    #[error("SIGSTACK: call depth exceeded")]
    SigStack,
    /// Undecodable instruction or invalid operand.
    #[error("SIGILL: illegal instruction")]
    SigIll,
    /// Memory access outside the sandbox, or misaligned when alignment is checked.
    #[error("SIGSEGV: invalid memory access")]
    SigSegv,
    /// A store rejected because the target mapping is read-only.
    #[error("SIGRDONLY: store to read-only memory")]
    SigRdOnly,
    /// The compute budget was exhausted.
    #[error("SIGCOST: compute budget exceeded")]
    SigCost,
    /// A syscall failed with its own error code.
    #[error("syscall fault {0}")]
    Syscall(u32),
}

/// Errors returned by the VM API (as opposed to program faults, which are
/// wrapped in [`VmError::Fault`]).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VmError {
    /// The instance could not be constructed from the given arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("syscall {name} (hash {hash:#010x}) is already registered")]
    DuplicateSyscall { name: String, hash: u32 },
    /// `exec` was called on an instance that already ran; call `reset` first.
    #[error("vm already executed, reset it before running again")]
    NotReady,
    #[error("program faulted: {0}")]
    Fault(#[from] Fault),
}

impl VmError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        VmError::InvalidArgument(message.into())
    }

    /// Returns the program fault, if this error is one.
    pub fn fault(&self) -> Option<Fault> {
        match self {
            VmError::Fault(fault) => Some(*fault),
            _ => None,
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;
