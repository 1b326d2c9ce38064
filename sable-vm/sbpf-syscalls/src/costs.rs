// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Compute unit prices of the reference syscalls.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyscallCosts {
    /// Minimum charge of any syscall that does work.
    pub syscall_base_cost: u64,
    pub log_64_units: u64,
    /// Minimum charge of a memory operation.
    pub mem_op_base_cost: u64,
    /// Bytes a memory operation may touch per compute unit.
    pub cpi_bytes_per_unit: u64,
}

impl Default for SyscallCosts {
    fn default() -> Self {
        Self {
            syscall_base_cost: 100,
            log_64_units: 100,
            mem_op_base_cost: 10,
            cpi_bytes_per_unit: 250,
        }
    }
}

impl SyscallCosts {
    pub fn mem_op_cost(&self, n: u64) -> u64 {
        self.mem_op_base_cost
            .max(n.checked_div(self.cpi_bytes_per_unit).unwrap_or(u64::MAX))
    }
}
