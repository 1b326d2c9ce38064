// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::config::{Error, NodeConfig, VmConfig};
use tracing::warn;

/// A trait for validating node configs. Each section that carries
/// invariants the rest of the node relies on implements it.
pub trait ConfigSanitizer {
    /// Get the name of the sanitizer (e.g., for logging and error strings)
    fn get_sanitizer_name() -> String {
        let config_name = std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("UnknownConfig");
        format!("{}Sanitizer", config_name)
    }

    /// Validate and process the config
    fn sanitize(node_config: &NodeConfig) -> Result<(), Error>;
}

impl ConfigSanitizer for NodeConfig {
    fn sanitize(node_config: &NodeConfig) -> Result<(), Error> {
        let result = VmConfig::sanitize(node_config);
        if let Err(error) = &result {
            warn!(error = %error, "node config failed sanitization");
        }
        result
    }
}
