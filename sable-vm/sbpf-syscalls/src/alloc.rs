// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use sable_sbpf_vm::{Fault, SyscallContext, constants::HEAP_ALIGN};
use std::alloc::Layout;

/// `sol_alloc_free_(size, free_addr)`: bump-allocates `size` bytes from the
/// heap and returns their address, or 0 when the heap is exhausted. Freeing
/// (a non-zero `free_addr`) does nothing and returns 0.
pub(crate) fn sol_alloc_free(
    ctx: &mut SyscallContext<'_, '_>,
    [size, free_addr, ..]: [u64; 5],
) -> Result<u64, Fault> {
    let align = if ctx.check_align() { HEAP_ALIGN } else { 1 };
    let Ok(layout) = Layout::from_size_align(size as usize, align as usize) else {
        return Ok(0);
    };
    if free_addr != 0 {
        return Ok(0);
    }
    Ok(ctx
        .heap_mut()
        .alloc(layout.size() as u64, layout.align() as u64)
        .map_or(0, |allocation| allocation.vaddr()))
}
