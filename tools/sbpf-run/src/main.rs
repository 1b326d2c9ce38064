// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail, format_err};
use clap::Parser;
use sable_config::config::{ConfigSanitizer, NodeConfig, PersistableConfig};
use sable_sbpf_syscalls::{LogCollector, SyscallCosts, SyscallError, register_builtins};
use sable_sbpf_vm::{
    ExecOutcome, ExecReport, Fault, InputMemory, Program, SbpfVersion, TraceBuffer, TraceEvent,
    TraceSink, Vm, VmParams,
    constants::INSN_SIZE,
    program::{CallDests, calldests_from_targets},
    verifier,
};
use std::{fs, path::PathBuf, process};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs a raw sBPF program (little-endian instruction words, no ELF
/// container) against the reference syscalls.
#[derive(Parser, Debug)]
#[clap(name = "sable-sbpf-run", author, version)]
struct Args {
    /// File holding the program text
    #[clap(long)]
    program: PathBuf,
    /// Node config (YAML); defaults apply when omitted
    #[clap(long)]
    config: Option<PathBuf>,
    /// File whose bytes become the (contiguous) input region
    #[clap(long)]
    input: Option<PathBuf>,
    /// Overrides the configured compute unit limit
    #[clap(long)]
    compute_units: Option<u64>,
    /// Instruction index to start at
    #[clap(long, default_value_t = 0)]
    entry_pc: u64,
    /// Instruction set version: v0, v1 or v2
    #[clap(long, default_value_t = SbpfVersion::V0)]
    version: SbpfVersion,
    /// Print the execution trace
    #[clap(long)]
    trace: bool,
    /// Comma separated call destinations; every instruction when omitted
    #[clap(long, value_delimiter = ',')]
    calldests: Option<Vec<u64>>,
    /// Run the static verifier before executing
    #[clap(long)]
    verify: bool,
}

#[derive(Debug)]
struct RunOutput {
    report: ExecReport,
    logs: Vec<String>,
    trace: Option<TraceBuffer>,
}

fn load_node_config(args: &Args) -> Result<NodeConfig> {
    let mut node_config = match &args.config {
        Some(path) => NodeConfig::load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(compute_units) = args.compute_units {
        node_config.vm.compute_unit_limit = compute_units;
    }
    if args.trace {
        node_config.vm.trace.enabled = true;
    }
    NodeConfig::sanitize(&node_config)?;
    Ok(node_config)
}

fn init_logger(node_config: &NodeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&node_config.logger.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A subscriber may already be installed (e.g. by tests).
    let _ = if node_config.logger.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn run(args: &Args, node_config: &NodeConfig) -> Result<RunOutput> {
    let text = fs::read(&args.program)
        .with_context(|| format!("failed to read program {}", args.program.display()))?;
    if text.len() as u64 % INSN_SIZE != 0 {
        bail!(
            "program is {} bytes, not a whole number of {}-byte instructions",
            text.len(),
            INSN_SIZE
        );
    }
    let text_cnt = text.len() as u64 / INSN_SIZE;
    let calldests = match &args.calldests {
        Some(targets) => calldests_from_targets(text_cnt, targets.iter().copied())?,
        None => CallDests::repeat(true, text_cnt as usize),
    };
    let program = Program::new(&text, 0, text_cnt, args.entry_pc, calldests, args.version, false)?;
    if args.verify {
        verifier::validate(&program)?;
    }

    let mut input = match &args.input {
        Some(path) => {
            fs::read(path).with_context(|| format!("failed to read input {}", path.display()))?
        },
        None => Vec::new(),
    };

    let log = LogCollector::default();
    let registry = register_builtins(SyscallCosts::default(), Some(log.clone()))?;
    let mut trace = node_config
        .vm
        .trace
        .enabled
        .then(|| TraceBuffer::new(node_config.vm.trace.event_max));

    let report = {
        let mut vm = Vm::new(
            &program,
            &registry,
            VmParams::from_config(&node_config.vm),
            InputMemory::contiguous(&mut input)?,
            trace.as_mut().map(|trace| trace as &mut dyn TraceSink),
        )?;
        // Faults are reported, not propagated.
        if let Err(error) = vm.exec() {
            if error.fault().is_none() {
                return Err(error.into());
            }
        }
        vm.report()
            .ok_or_else(|| format_err!("vm finished without a report"))?
    };

    Ok(RunOutput {
        report,
        logs: log.messages(),
        trace,
    })
}

/// Human readable outcome, naming the reference syscall error behind a
/// syscall fault code when there is one.
fn describe_outcome(outcome: ExecOutcome) -> String {
    match outcome {
        ExecOutcome::Fault(Fault::Syscall(code)) => match SyscallError::from_code(code) {
            Some(error) => format!("{} ({})", outcome, error),
            None => outcome.to_string(),
        },
        _ => outcome.to_string(),
    }
}

fn print_output(output: &RunOutput) -> Result<()> {
    if let Some(trace) = &output.trace {
        for event in trace.events() {
            match event {
                TraceEvent::Instruction { pc, ic, cu, regs } => {
                    println!("{:>6} ic={:<6} cu={:<8} {:x?}", pc, ic, cu, regs)
                },
                TraceEvent::Memory {
                    vaddr,
                    sz,
                    access,
                    value,
                } => println!("       {} {}@{:#x} = {:#x}", access, sz, vaddr, value),
            }
        }
        if trace.overflowed() {
            println!("(trace truncated)");
        }
    }
    for message in &output.logs {
        println!("{}", message);
    }
    println!("# {}", describe_outcome(output.report.outcome));
    print!("{}", serde_yaml::to_string(&output.report)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let node_config = load_node_config(&args)?;
    init_logger(&node_config);

    let output = run(&args, &node_config)?;
    info!(
        outcome = %describe_outcome(output.report.outcome),
        ic = output.report.ic,
        cu = output.report.cu,
        "program finished"
    );
    print_output(&output)?;
    if output.report.outcome != ExecOutcome::Success {
        process::exit(1);
    }
    Ok(())
}
