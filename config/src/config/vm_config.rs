// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::config::{config_sanitizer::ConfigSanitizer, Error, NodeConfig};
use serde::{Deserialize, Serialize};

/// Largest compute budget a single program invocation may request.
pub const MAX_COMPUTE_UNIT_LIMIT: u64 = 1_400_000;
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u64 = 200_000;

pub const MIN_HEAP_SIZE: u64 = 32 * 1024;
pub const MAX_HEAP_SIZE: u64 = 256 * 1024;
/// Requested heap sizes must be a multiple of this granule.
pub const HEAP_SIZE_GRANULE: u64 = 1024;

pub const MAX_CALL_DEPTH: u64 = 64;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Compute units granted to each program invocation
    pub compute_unit_limit: u64,
    /// Size in bytes of the heap arena handed to syscalls
    pub heap_size: u64,
    /// Maximum number of nested calls (shadow stack frames)
    pub max_call_depth: u64,
    /// Map account data directly into the input region as separate fragments
    pub direct_mapping: bool,
    pub trace: TraceConfig,
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            heap_size: MIN_HEAP_SIZE,
            max_call_depth: MAX_CALL_DEPTH,
            direct_mapping: false,
            trace: TraceConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceConfig {
    /// Record an execution trace for every run
    pub enabled: bool,
    /// Maximum number of events kept per run; recording stops once reached
    pub event_max: usize,
}

impl Default for TraceConfig {
    fn default() -> TraceConfig {
        TraceConfig {
            enabled: false,
            event_max: 1 << 16,
        }
    }
}

impl ConfigSanitizer for VmConfig {
    fn sanitize(node_config: &NodeConfig) -> Result<(), Error> {
        let sanitizer_name = Self::get_sanitizer_name();
        let vm_config = &node_config.vm;

        if vm_config.compute_unit_limit > MAX_COMPUTE_UNIT_LIMIT {
            return Err(Error::ConfigSanitizerFailed(
                sanitizer_name,
                format!(
                    "compute unit limit {} exceeds the maximum of {}",
                    vm_config.compute_unit_limit, MAX_COMPUTE_UNIT_LIMIT
                ),
            ));
        }

        if !(MIN_HEAP_SIZE..=MAX_HEAP_SIZE).contains(&vm_config.heap_size)
            || vm_config.heap_size % HEAP_SIZE_GRANULE != 0
        {
            return Err(Error::ConfigSanitizerFailed(
                sanitizer_name,
                format!(
                    "heap size {} must be a multiple of {} in [{}, {}]",
                    vm_config.heap_size, HEAP_SIZE_GRANULE, MIN_HEAP_SIZE, MAX_HEAP_SIZE
                ),
            ));
        }

        if vm_config.max_call_depth == 0 || vm_config.max_call_depth > MAX_CALL_DEPTH {
            return Err(Error::ConfigSanitizerFailed(
                sanitizer_name,
                format!(
                    "max call depth {} must be in [1, {}]",
                    vm_config.max_call_depth, MAX_CALL_DEPTH
                ),
            ));
        }

        if vm_config.trace.enabled && vm_config.trace.event_max == 0 {
            return Err(Error::ConfigSanitizerFailed(
                sanitizer_name,
                "tracing is enabled but the trace can hold no events".to_string(),
            ));
        }

        Ok(())
    }
}
