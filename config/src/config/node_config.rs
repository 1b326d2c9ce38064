// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::config::{LoggerConfig, VmConfig};
use serde::{Deserialize, Serialize};

/// The node configuration defines the configuration for a single Sable
/// node. It is composed of module configurations for each of the modules
/// that the node uses.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub vm: VmConfig,
}
