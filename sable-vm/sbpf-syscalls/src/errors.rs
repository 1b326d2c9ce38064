// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use sable_sbpf_vm::Fault;
use thiserror::Error;

/// Failures of the reference syscalls. Each ends the run as
/// [`Fault::Syscall`] carrying [`SyscallError::code`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SyscallError {
    #[error("program aborted")]
    Abort,
    #[error("program panicked")]
    Panic,
    #[error("invalid UTF-8 string")]
    InvalidString,
    #[error("overlapping memory copy")]
    CopyOverlapping,
}

impl SyscallError {
    pub fn code(self) -> u32 {
        match self {
            SyscallError::Abort => 1,
            SyscallError::Panic => 2,
            SyscallError::InvalidString => 3,
            SyscallError::CopyOverlapping => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(SyscallError::Abort),
            2 => Some(SyscallError::Panic),
            3 => Some(SyscallError::InvalidString),
            4 => Some(SyscallError::CopyOverlapping),
            _ => None,
        }
    }
}

impl From<SyscallError> for Fault {
    fn from(error: SyscallError) -> Self {
        Fault::Syscall(error.code())
    }
}
