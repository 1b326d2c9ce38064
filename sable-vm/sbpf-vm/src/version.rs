// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Instruction set revision a program was built for. Fixed for the lifetime
/// of a VM instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SbpfVersion {
    #[default]
    V0,
    V1,
    V2,
}

impl SbpfVersion {
    /// Stack frames have no guard gaps and the frame pointer is managed by
    /// the program (`add64 r10, imm`) instead of being bumped on every call.
    pub fn dynamic_stack_frames(self) -> bool {
        self >= SbpfVersion::V1
    }

    pub fn enable_lddw(self) -> bool {
        self < SbpfVersion::V2
    }

    pub fn enable_neg(self) -> bool {
        self < SbpfVersion::V2
    }

    pub fn enable_le(self) -> bool {
        self < SbpfVersion::V2
    }

    /// `add32`/`sub32` results are sign extended to 64 bits instead of zero extended.
    pub fn explicit_sign_extension_of_results(self) -> bool {
        self >= SbpfVersion::V2
    }

    /// `callx` reads its target from the source register instead of the
    /// register named by the immediate.
    pub fn callx_uses_src_reg(self) -> bool {
        self >= SbpfVersion::V2
    }
}

impl fmt::Display for SbpfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SbpfVersion::V0 => "v0",
            SbpfVersion::V1 => "v1",
            SbpfVersion::V2 => "v2",
        };
        f.write_str(name)
    }
}

impl FromStr for SbpfVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v0" | "0" => Ok(SbpfVersion::V0),
            "v1" | "1" => Ok(SbpfVersion::V1),
            "v2" | "2" => Ok(SbpfVersion::V2),
            other => Err(format!("unknown sBPF version: {}", other)),
        }
    }
}
