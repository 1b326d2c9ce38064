// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{errors::VmError, memory::SegvRecord, version::SbpfVersion};
use serde::Serialize;
use std::fmt;
use tracing::field;

/// Structured fields attached to VM log events.
#[derive(Clone, Debug, Default)]
pub struct LogSchema<'a> {
    name: Option<LogEntry>,
    error: Option<&'a VmError>,
    sbpf_version: Option<SbpfVersion>,
    entry_pc: Option<u64>,
    pc: Option<u64>,
    ic: Option<u64>,
    cu_consumed: Option<u64>,
    frame_cnt: Option<u64>,
    segv: Option<SegvRecord>,
    message: Option<&'a str>,
}

impl<'a> LogSchema<'a> {
    pub fn new(name: LogEntry) -> Self {
        Self {
            name: Some(name),
            ..Default::default()
        }
    }

    pub fn error(mut self, error: &'a VmError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn sbpf_version(mut self, sbpf_version: SbpfVersion) -> Self {
        self.sbpf_version = Some(sbpf_version);
        self
    }

    pub fn entry_pc(mut self, entry_pc: u64) -> Self {
        self.entry_pc = Some(entry_pc);
        self
    }

    pub fn pc(mut self, pc: u64) -> Self {
        self.pc = Some(pc);
        self
    }

    pub fn ic(mut self, ic: u64) -> Self {
        self.ic = Some(ic);
        self
    }

    pub fn cu_consumed(mut self, cu_consumed: u64) -> Self {
        self.cu_consumed = Some(cu_consumed);
        self
    }

    pub fn frame_cnt(mut self, frame_cnt: u64) -> Self {
        self.frame_cnt = Some(frame_cnt);
        self
    }

    pub fn segv(mut self, segv: Option<SegvRecord>) -> Self {
        self.segv = segv;
        self
    }

    pub fn message(mut self, message: &'a str) -> Self {
        self.message = Some(message);
        self
    }
}

macro_rules! emit {
    ($level:ident, $schema:expr) => {{
        let schema = $schema;
        tracing::$level!(
            name = schema.name.map_or("", LogEntry::as_str),
            error = schema.error.map(field::display),
            sbpf_version = schema.sbpf_version.map(field::display),
            entry_pc = schema.entry_pc,
            pc = schema.pc,
            ic = schema.ic,
            cu_consumed = schema.cu_consumed,
            frame_cnt = schema.frame_cnt,
            segv_vaddr = schema.segv.map(|segv| segv.vaddr),
            segv_access = schema.segv.map(|segv| field::display(segv.access)),
            "{}",
            schema.message.unwrap_or("")
        )
    }};
}

impl LogSchema<'_> {
    pub fn debug(&self) {
        emit!(debug, self);
    }

    pub fn warn(&self) {
        emit!(warn, self);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntry {
    VmInit,
    Execute,
    Reset,
}

impl LogEntry {
    pub fn as_str(self) -> &'static str {
        match self {
            LogEntry::VmInit => "vm_init",
            LogEntry::Execute => "execute",
            LogEntry::Reset => "reset",
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
