// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to sanitize the node config! Sanitizer: {0}, Error: {1}")]
    ConfigSanitizerFailed(String, String),
    #[error("Error accessing {0}: {1}")]
    IO(String, #[source] std::io::Error),
    #[error("Error (de)serializing {0}: {1}")]
    Yaml(String, #[source] serde_yaml::Error),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

