// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Configuration for a Sable node. Today this covers the sBPF virtual machine
//! limits and the logger; each section can be loaded from and persisted to YAML.

pub mod config;
