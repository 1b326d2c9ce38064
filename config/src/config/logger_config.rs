// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Default log filter used when neither the config nor `RUST_LOG` specify one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerConfig {
    /// Filter directive handed to the subscriber, e.g. `info` or `sable_sbpf_vm=debug`
    pub level: String,
    /// Emit logs as JSON lines instead of human readable text
    pub json: bool,
}

impl Default for LoggerConfig {
    fn default() -> LoggerConfig {
        LoggerConfig {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}
