// Copyright © Sable Foundation
// SPDX-License-Identifier: Apache-2.0

use claims::{assert_err, assert_err_eq, assert_matches, assert_ok, assert_some};
use proptest::prelude::*;
use sable_sbpf_vm::{
    AccessType, ExecOutcome, ExecReport, Fault, InputMemory, InputRegion, Program, SbpfVersion,
    SyscallRegistry, TraceBuffer, TraceEvent, Vm, VmError, VmParams,
    constants::{MM_INPUT_START, MM_PROGRAM_START, MM_STACK_START, STACK_FRAME_SZ},
    instruction::{Instruction, assemble, opcodes::*, words_to_bytes},
    syscalls::{hash_symbol_name, make_syscall},
};

fn text(instructions: &[Instruction]) -> Vec<u8> {
    words_to_bytes(&assemble(instructions))
}

fn params(entry_cu: u64) -> VmParams {
    VmParams {
        entry_cu,
        ..Default::default()
    }
}

/// Runs `program` over an empty input and returns the report and registers.
fn run(program: &Program<'_>, params: VmParams) -> (ExecReport, Vec<u64>) {
    let registry = SyscallRegistry::default();
    let mut vm = assert_ok!(Vm::new(program, &registry, params, InputMemory::default(), None));
    let _ = vm.exec();
    let report = assert_some!(vm.report());
    (report, vm.registers().to_vec())
}

#[test]
fn test_add_add_exit() {
    let bytes = text(&[
        Instruction::add64_imm(0, 1),
        Instruction::add64_imm(0, 1),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let (report, regs) = run(&program, params(10));
    assert_eq!(report.outcome, ExecOutcome::Success);
    assert_eq!(regs[0], 2);
    assert_eq!(report.ic, 3);
    assert_eq!(report.cu, 7);
}

#[test]
fn test_call_to_non_function() {
    let bytes = text(&[
        Instruction::call(5),
        Instruction::exit(),
        Instruction::exit(),
        Instruction::exit(),
        Instruction::exit(),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let registry = SyscallRegistry::default();
    let mut vm = assert_ok!(Vm::new(&program, &registry, params(10), InputMemory::default(), None));
    assert_err_eq!(vm.exec(), VmError::Fault(Fault::SigCall));
    assert_eq!(vm.pc(), 5);
    assert_eq!(vm.frame_cnt(), 0);
    // Only the call itself was charged.
    assert_eq!(vm.ic(), 1);
    assert_eq!(vm.cu(), 9);
    let report = assert_some!(vm.report());
    assert_eq!(report.frame_cnt, 1);
}

#[test]
fn test_store_to_read_only_fragment() {
    let bytes = text(&[Instruction::st(STB, 1, 11, 1), Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let registry = SyscallRegistry::default();

    let mut header = [0u8; 8];
    let data = [0u8; 8];
    let input = assert_ok!(InputMemory::fragmented(
        vec![
            InputRegion::writable(0, &mut header, false),
            InputRegion::readonly(8, &data, true),
        ],
        vec![],
    ));
    let params = VmParams {
        direct_mapping: true,
        ..params(10)
    };
    let mut vm = assert_ok!(Vm::new(&program, &registry, params, input, None));
    assert_err_eq!(vm.exec(), VmError::Fault(Fault::SigRdOnly));
    let segv = assert_some!(vm.segv());
    assert_eq!(segv.vaddr, MM_INPUT_START + 11);
    assert_eq!(segv.access, AccessType::Store);
    assert_eq!(vm.pc(), 0);
    assert_eq!(vm.ic(), 0);
}

#[test]
fn test_fragmented_input_needs_direct_mapping() {
    let bytes = text(&[Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let registry = SyscallRegistry::default();
    let data = [0u8; 8];
    let input = assert_ok!(InputMemory::fragmented(
        vec![InputRegion::readonly(0, &data, true)],
        vec![],
    ));
    assert_matches!(
        Vm::new(&program, &registry, params(10), input, None),
        Err(VmError::InvalidArgument(_))
    );
}

#[test]
fn test_call_depth_limit() {
    // Each frame records its frame pointer at the top of its own stack frame,
    // then recurses.
    let bytes = text(&[
        Instruction::stx(STXDW, 10, 10, -8),
        Instruction::call(0),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [0], SbpfVersion::V0));
    let registry = SyscallRegistry::default();
    let frame_max = 3;
    let params = VmParams {
        frame_max,
        ..params(100)
    };
    let mut vm = assert_ok!(Vm::new(&program, &registry, params, InputMemory::default(), None));
    assert_err_eq!(vm.exec(), VmError::Fault(Fault::SigStack));
    let report = assert_some!(vm.report());
    assert_eq!(report.frame_cnt, frame_max);
    assert_eq!(report.pc, 1);
    // frame_max + 1 stores and frame_max + 1 calls, the last call included.
    assert_eq!(report.ic, 2 * (frame_max + 1));

    let stack = vm.memory().stack_bytes();
    for frame in 0..=frame_max {
        let top = ((frame + 1) * STACK_FRAME_SZ) as usize;
        let saved = u64::from_le_bytes(stack[top - 8..top].try_into().unwrap());
        assert_eq!(saved, MM_STACK_START + (frame + 1) * 0x2000);
    }
}

#[test]
fn test_budget_boundary_faults() {
    let bytes = text(&[
        Instruction::add64_imm(0, 1),
        Instruction::add64_imm(0, 1),
        Instruction::add64_imm(0, 1),
        Instruction::add64_imm(0, 1),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    // The fourth instruction exceeds the budget by exactly one unit.
    let (report, regs) = run(&program, params(3));
    assert_matches!(report.outcome, ExecOutcome::Fault(_));
    assert_eq!(report.ic, 3);
    assert_eq!(report.cu, 0);
    assert_eq!(report.pc, 3);
    assert_eq!(regs[0], 3);
}

#[test]
fn test_zero_budget_faults_before_first_instruction() {
    let bytes = text(&[Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let (report, _) = run(&program, params(0));
    assert_matches!(report.outcome, ExecOutcome::Fault(_));
    assert_eq!((report.pc, report.ic, report.cu), (0, 0, 0));
}

#[test]
fn test_calls_restore_callee_saved_registers() {
    for version in [SbpfVersion::V0, SbpfVersion::V1] {
        let bytes = text(&[
            Instruction::mov64_imm(6, 9),
            Instruction::call(4),
            Instruction::alu_reg(MOV64_REG, 0, 6),
            Instruction::exit(),
            // Callee clobbers r6 and the frame pointer bookkeeping.
            Instruction::mov64_imm(6, 1),
            Instruction::exit(),
        ]);
        let program = assert_ok!(Program::from_text(&bytes, 0, [4], version));
        let (report, regs) = run(&program, params(100));
        assert_eq!(report.outcome, ExecOutcome::Success);
        assert_eq!(regs[0], 9);
        assert_eq!(report.ic, 6);
    }
}

#[test]
fn test_callx_through_program_address() {
    let [lo, hi] = Instruction::lddw(2, MM_PROGRAM_START + 4 * 8);
    let bytes = text(&[
        lo,
        hi,
        Instruction::callx(2, false),
        Instruction::exit(),
        Instruction::mov64_imm(0, 42),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [4], SbpfVersion::V0));
    let (report, regs) = run(&program, params(100));
    assert_eq!(report.outcome, ExecOutcome::Success);
    assert_eq!(regs[0], 42);

    // Outside the program region: relocated with wrapping arithmetic and
    // left in `pc`.
    let [lo, hi] = Instruction::lddw(2, MM_STACK_START);
    let bytes = text(&[lo, hi, Instruction::callx(2, false), Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let (report, _) = run(&program, params(100));
    assert_eq!(report.outcome, ExecOutcome::Fault(Fault::SigText));
    assert_eq!(report.pc, (MM_STACK_START - MM_PROGRAM_START) / 8);
    assert_eq!((report.ic, report.cu, report.frame_cnt), (2, 98, 1));

    let bytes = text(&[Instruction::callx(2, false), Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let (report, _) = run(&program, params(100));
    assert_eq!(report.outcome, ExecOutcome::Fault(Fault::SigText));
    assert_eq!(report.pc, 0u64.wrapping_sub(MM_PROGRAM_START) / 8);
}

#[test]
fn test_callx_to_non_function() {
    let [lo, hi] = Instruction::lddw(2, MM_PROGRAM_START + 4 * 8);
    let bytes = text(&[
        lo,
        hi,
        Instruction::callx(2, false),
        Instruction::exit(),
        Instruction::mov64_imm(0, 42),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let (report, regs) = run(&program, params(100));
    assert_eq!(report.outcome, ExecOutcome::Fault(Fault::SigCall));
    assert_eq!(report.pc, 4);
    assert_eq!((report.ic, report.cu, report.frame_cnt), (2, 98, 1));
    assert_eq!(regs[0], 0);
}

#[test]
fn test_call_outside_text() {
    let bytes = text(&[Instruction::call(6), Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let registry = SyscallRegistry::default();
    let mut vm = assert_ok!(Vm::new(
        &program,
        &registry,
        params(100),
        InputMemory::default(),
        None
    ));
    assert_err_eq!(vm.exec(), VmError::Fault(Fault::SigText));
    // Same final pc as a jump to the same target.
    assert_eq!(vm.pc(), 6);
    assert_eq!((vm.ic(), vm.cu()), (1, 99));
    let report = assert_some!(vm.report());
    assert_eq!(report.frame_cnt, 1);

    let bytes = text(&[Instruction::ja(5), Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let (report, _) = run(&program, params(100));
    assert_eq!(report.outcome, ExecOutcome::Fault(Fault::SigText));
    assert_eq!(report.pc, 6);
}

#[test]
fn test_syscall_dispatch() {
    let double = make_syscall(|ctx, args| {
        ctx.consume(5)?;
        Ok(args[0] * 2)
    });
    let fail = make_syscall(|ctx, _| {
        ctx.consume(2)?;
        Err(Fault::Syscall(7))
    });
    let registry = assert_ok!(SyscallRegistry::new([("double", double), ("fail", fail)]));

    let bytes = text(&[
        Instruction::mov64_imm(1, 21),
        Instruction::syscall(hash_symbol_name(b"double")),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let mut vm = assert_ok!(Vm::new(
        &program,
        &registry,
        params(100),
        InputMemory::default(),
        None
    ));
    assert_ok!(vm.exec());
    assert_eq!(vm.reg(0), Some(42));
    assert_eq!(vm.ic(), 3);
    assert_eq!(vm.cu(), 100 - 3 - 5);

    let bytes = text(&[
        Instruction::syscall(hash_symbol_name(b"fail")),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let mut vm = assert_ok!(Vm::new(
        &program,
        &registry,
        params(100),
        InputMemory::default(),
        None
    ));
    assert_err_eq!(vm.exec(), VmError::Fault(Fault::Syscall(7)));
    // The handler's charges stick.
    assert_eq!((vm.pc(), vm.ic(), vm.cu()), (0, 1, 97));
}

#[test]
fn test_trace_records_instructions_and_memory() {
    let bytes = text(&[
        Instruction::mov64_imm(2, 0x1234),
        Instruction::stx(STXH, 10, 2, -2),
        Instruction::exit(),
    ]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let registry = SyscallRegistry::default();
    let mut trace = TraceBuffer::new(16);
    {
        let mut vm = assert_ok!(Vm::new(
            &program,
            &registry,
            params(10),
            InputMemory::default(),
            Some(&mut trace),
        ));
        assert_ok!(vm.exec());
    }
    let events = trace.events();
    assert_eq!(events.len(), 4);
    assert_matches!(&events[0], TraceEvent::Instruction { pc: 0, ic: 0, cu: 10, .. });
    assert_matches!(
        &events[2],
        TraceEvent::Memory { sz: 2, access: AccessType::Store, value: 0x1234, .. }
    );
    assert_matches!(&events[3], TraceEvent::Instruction { pc: 2, ic: 2, cu: 8, .. });
    assert!(!trace.overflowed());
}

#[test]
fn test_heap_handles_go_stale_on_reset() {
    let bytes = text(&[Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let registry = SyscallRegistry::default();
    let mut vm = assert_ok!(Vm::new(&program, &registry, params(10), InputMemory::default(), None));
    let allocation = assert_some!(vm.memory_mut().heap_mut().alloc(16, 8));
    assert_some!(vm.memory().heap().get(&allocation));
    vm.reset();
    assert_eq!(vm.memory().heap().heap_sz(), 0);
    assert!(vm.memory().heap().get(&allocation).is_none());
}

#[test]
fn test_exit_requires_reset() {
    let bytes = text(&[Instruction::exit()]);
    let program = assert_ok!(Program::from_text(&bytes, 0, [], SbpfVersion::V0));
    let registry = SyscallRegistry::default();
    let mut vm = assert_ok!(Vm::new(&program, &registry, params(10), InputMemory::default(), None));
    assert_ok!(vm.exec());
    assert_err!(vm.exec());
}

fn arbitrary_instruction() -> impl Strategy<Value = u64> {
    prop_oneof![
        any::<u64>(),
        (0u8..10, any::<i32>()).prop_map(|(dst, imm)| Instruction::mov64_imm(dst, imm).encode()),
        (0u8..10, 0u8..11, -16i16..16)
            .prop_map(|(dst, src, off)| Instruction::ldx(LDXDW, dst, src, off).encode()),
        (0u8..11, 0u8..10, -16i16..0)
            .prop_map(|(dst, src, off)| Instruction::stx(STXB, dst, src, off).encode()),
        (-4i16..4).prop_map(|off| Instruction::ja(off).encode()),
        (0u32..16).prop_map(|target| Instruction::call(target).encode()),
        Just(Instruction::exit().encode()),
    ]
}

proptest! {
    #[test]
    fn runs_are_deterministic(
        words in proptest::collection::vec(arbitrary_instruction(), 1..16),
        entry_cu in 0u64..200,
        version in prop_oneof![Just(SbpfVersion::V0), Just(SbpfVersion::V1), Just(SbpfVersion::V2)],
    ) {
        let bytes = words_to_bytes(&words);
        let targets: Vec<u64> = (0..words.len() as u64).step_by(2).collect();
        let program = Program::from_text(&bytes, 0, targets, version).unwrap();
        let registry = SyscallRegistry::default();
        let params = VmParams { entry_cu, frame_max: 4, ..Default::default() };

        let mut first = Vm::new(&program, &registry, params, InputMemory::default(), None).unwrap();
        let first_result = first.exec();
        let mut second =
            Vm::new(&program, &registry, params, InputMemory::default(), None).unwrap();
        let second_result = second.exec();

        prop_assert_eq!(first_result, second_result.clone());
        prop_assert_eq!(first.report(), second.report());
        prop_assert_eq!(first.registers(), second.registers());
        prop_assert_eq!(first.memory().stack_bytes(), second.memory().stack_bytes());
        // Without syscalls every retired instruction costs exactly one unit.
        prop_assert_eq!(first.ic() + first.cu(), entry_cu);

        // A reset instance replays the same run.
        first.reset();
        prop_assert_eq!(first.exec(), second_result);
        prop_assert_eq!(first.report(), second.report());
    }
}
