// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{costs::SyscallCosts, errors::SyscallError};
use parking_lot::Mutex;
use sable_sbpf_vm::{Fault, SyscallContext};
use std::{str, sync::Arc};
use tracing::debug;

/// Default cap on the bytes of program log kept per collector.
pub const DEFAULT_LOG_BYTES_LIMIT: usize = 10_000;

#[derive(Debug, Default)]
struct LogBuffer {
    messages: Vec<String>,
    bytes_written: usize,
    limit_warning: bool,
}

/// Collects program log messages, shared between the registry's handlers
/// and whoever reads the log after the run.
#[derive(Clone, Debug)]
pub struct LogCollector {
    buffer: Option<Arc<Mutex<LogBuffer>>>,
    bytes_limit: usize,
}

impl Default for LogCollector {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_BYTES_LIMIT)
    }
}

impl LogCollector {
    pub fn new(bytes_limit: usize) -> Self {
        Self {
            buffer: Some(Arc::default()),
            bytes_limit,
        }
    }

    /// A collector that drops every message.
    pub fn disabled() -> Self {
        Self {
            buffer: None,
            bytes_limit: 0,
        }
    }

    pub fn log(&self, message: &str) {
        debug!(target: "sbpf_program_log", "{}", message);
        let Some(buffer) = &self.buffer else {
            return;
        };
        let mut buffer = buffer.lock();
        if buffer.limit_warning {
            return;
        }
        let bytes_written = buffer.bytes_written.saturating_add(message.len());
        if bytes_written >= self.bytes_limit {
            buffer.limit_warning = true;
            buffer.messages.push("Log truncated".to_string());
            return;
        }
        buffer.bytes_written = bytes_written;
        buffer.messages.push(message.to_string());
    }

    /// Every message collected so far.
    pub fn messages(&self) -> Vec<String> {
        self.buffer
            .as_ref()
            .map(|buffer| buffer.lock().messages.clone())
            .unwrap_or_default()
    }
}

fn translate_str(ctx: &mut SyscallContext<'_, '_>, vaddr: u64, len: u64) -> Result<String, Fault> {
    let bytes = ctx.slice(vaddr, len)?;
    str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| SyscallError::InvalidString.into())
}

pub(crate) fn sol_log(
    ctx: &mut SyscallContext<'_, '_>,
    [addr, len, ..]: [u64; 5],
    costs: &SyscallCosts,
    log: &LogCollector,
) -> Result<u64, Fault> {
    ctx.consume(costs.syscall_base_cost.max(len))?;
    let message = translate_str(ctx, addr, len)?;
    log.log(&format!("Program log: {}", message));
    Ok(0)
}

pub(crate) fn sol_log_64(
    ctx: &mut SyscallContext<'_, '_>,
    args: [u64; 5],
    costs: &SyscallCosts,
    log: &LogCollector,
) -> Result<u64, Fault> {
    ctx.consume(costs.log_64_units)?;
    log.log(&format!(
        "Program log: {:#x}, {:#x}, {:#x}, {:#x}, {:#x}",
        args[0], args[1], args[2], args[3], args[4]
    ));
    Ok(0)
}

pub(crate) fn sol_log_compute_units(
    ctx: &mut SyscallContext<'_, '_>,
    _args: [u64; 5],
    costs: &SyscallCosts,
    log: &LogCollector,
) -> Result<u64, Fault> {
    ctx.consume(costs.syscall_base_cost)?;
    log.log(&format!("Program consumption: {} units remaining", ctx.remaining_cu()));
    Ok(0)
}

pub(crate) fn sol_panic(
    ctx: &mut SyscallContext<'_, '_>,
    [file, len, line, column, _]: [u64; 5],
    log: &LogCollector,
) -> Result<u64, Fault> {
    ctx.consume(len)?;
    let file = translate_str(ctx, file, len)?;
    log.log(&format!("Program panicked at {}:{}:{}", file, line, column));
    Err(SyscallError::Panic.into())
}
