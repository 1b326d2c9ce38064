// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

//! `memcpy`, `memmove`, `memset` and `memcmp` over program memory. Every
//! operand must translate as a single span.

use crate::{costs::SyscallCosts, errors::SyscallError};
use sable_sbpf_vm::{Fault, SyscallContext};
use std::cmp::Ordering;

fn is_nonoverlapping(src: u64, dst: u64, n: u64) -> bool {
    if src > dst {
        src - dst >= n
    } else {
        dst - src >= n
    }
}

fn copy(ctx: &mut SyscallContext<'_, '_>, dst: u64, src: u64, n: u64) -> Result<u64, Fault> {
    let buf = ctx.slice(src, n)?.to_vec();
    ctx.slice_mut(dst, n)?.copy_from_slice(&buf);
    Ok(0)
}

/// `sol_memcpy_(dst, src, n)`.
pub(crate) fn sol_memcpy(
    ctx: &mut SyscallContext<'_, '_>,
    [dst, src, n, ..]: [u64; 5],
    costs: &SyscallCosts,
) -> Result<u64, Fault> {
    ctx.consume(costs.mem_op_cost(n))?;
    if !is_nonoverlapping(src, dst, n) {
        return Err(SyscallError::CopyOverlapping.into());
    }
    copy(ctx, dst, src, n)
}

/// `sol_memmove_(dst, src, n)`.
pub(crate) fn sol_memmove(
    ctx: &mut SyscallContext<'_, '_>,
    [dst, src, n, ..]: [u64; 5],
    costs: &SyscallCosts,
) -> Result<u64, Fault> {
    ctx.consume(costs.mem_op_cost(n))?;
    copy(ctx, dst, src, n)
}

/// `sol_memset_(dst, c, n)`.
pub(crate) fn sol_memset(
    ctx: &mut SyscallContext<'_, '_>,
    [dst, c, n, ..]: [u64; 5],
    costs: &SyscallCosts,
) -> Result<u64, Fault> {
    ctx.consume(costs.mem_op_cost(n))?;
    ctx.slice_mut(dst, n)?.fill(c as u8);
    Ok(0)
}

/// `sol_memcmp_(s1, s2, n, result)`: stores the difference of the first
/// mismatching bytes (0 if equal) as an `i32` at `result`.
pub(crate) fn sol_memcmp(
    ctx: &mut SyscallContext<'_, '_>,
    [s1, s2, n, result_addr, _]: [u64; 5],
    costs: &SyscallCosts,
) -> Result<u64, Fault> {
    ctx.consume(costs.mem_op_cost(n))?;
    let lhs = ctx.slice(s1, n)?.to_vec();
    let rhs = ctx.slice(s2, n)?;
    let result = lhs
        .iter()
        .zip(rhs)
        .find_map(|(a, b)| match a.cmp(b) {
            Ordering::Equal => None,
            _ => Some(*a as i32 - *b as i32),
        })
        .unwrap_or(0);
    ctx.memory().store(result_addr, 4, result as u32 as u64)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 8, 8 => true)]
    #[test_case(0, 7, 8 => false)]
    #[test_case(8, 0, 8 => true)]
    #[test_case(8, 1, 8 => false)]
    #[test_case(5, 5, 0 => true)]
    fn test_is_nonoverlapping(src: u64, dst: u64, n: u64) -> bool {
        is_nonoverlapping(src, dst, n)
    }
}
