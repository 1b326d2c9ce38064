// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

// All modules should be declared below
mod config_sanitizer;
mod error;
mod logger_config;
mod node_config;
mod persistable_config;
mod vm_config;

// All public usage statements should be declared below
pub use config_sanitizer::*;
pub use error::*;
pub use logger_config::*;
pub use node_config::*;
pub use persistable_config::*;
pub use vm_config::*;
