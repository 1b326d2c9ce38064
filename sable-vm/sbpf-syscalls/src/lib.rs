// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! The reference syscall set.
//!
//! Handlers charge their compute cost before touching memory, so a run that
//! cannot afford a syscall never observes its side effects.

mod alloc;
mod costs;
mod errors;
mod log;
mod mem_ops;

pub use costs::SyscallCosts;
pub use errors::SyscallError;
pub use log::LogCollector;

use sable_sbpf_vm::{SyscallFunction, SyscallRegistry, VmResult, make_syscall};

/// Builds the registry of every reference syscall. Messages logged by
/// programs are also appended to `log_collector` when one is given.
pub fn register_builtins(
    costs: SyscallCosts,
    log_collector: Option<LogCollector>,
) -> VmResult<SyscallRegistry> {
    let log_collector = log_collector.unwrap_or_else(LogCollector::disabled);
    let mut syscalls: Vec<(&str, SyscallFunction)> = vec![
        ("abort", make_syscall(|_, _| Err(SyscallError::Abort.into()))),
        ("sol_alloc_free_", make_syscall(alloc::sol_alloc_free)),
    ];

    {
        let log = log_collector.clone();
        syscalls.push((
            "sol_panic_",
            make_syscall(move |ctx, args| log::sol_panic(ctx, args, &log)),
        ));
    }
    {
        let log = log_collector.clone();
        syscalls.push((
            "sol_log_",
            make_syscall(move |ctx, args| log::sol_log(ctx, args, &costs, &log)),
        ));
    }
    {
        let log = log_collector.clone();
        syscalls.push((
            "sol_log_64_",
            make_syscall(move |ctx, args| log::sol_log_64(ctx, args, &costs, &log)),
        ));
    }
    {
        let log = log_collector;
        syscalls.push((
            "sol_log_compute_units_",
            make_syscall(move |ctx, args| log::sol_log_compute_units(ctx, args, &costs, &log)),
        ));
    }
    syscalls.extend([
        (
            "sol_memcpy_",
            make_syscall(move |ctx, args| mem_ops::sol_memcpy(ctx, args, &costs)),
        ),
        (
            "sol_memmove_",
            make_syscall(move |ctx, args| mem_ops::sol_memmove(ctx, args, &costs)),
        ),
        (
            "sol_memset_",
            make_syscall(move |ctx, args| mem_ops::sol_memset(ctx, args, &costs)),
        ),
        (
            "sol_memcmp_",
            make_syscall(move |ctx, args| mem_ops::sol_memcmp(ctx, args, &costs)),
        ),
        (
            "sol_remaining_compute_units",
            make_syscall(move |ctx, _| {
                ctx.consume(costs.syscall_base_cost)?;
                Ok(ctx.remaining_cu())
            }),
        ),
    ]);

    SyscallRegistry::new(syscalls)
}
