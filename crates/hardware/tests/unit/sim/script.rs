//! Scripted Executor Unit Tests.
//!
//! Program validation, pc encoding and op semantics when run by the scheduler.

use std::rc::Rc;

use hartsim_core::Memory;
use hartsim_core::common::ConfigError;
use hartsim_core::common::constants::RESERVATION_OK;
use hartsim_core::config::{BackendKind, FaultKind, ScratchpadConfig};
use hartsim_core::core::units::lsu::AtomicOp;
use hartsim_core::core::{Executor, ThreadId};
use hartsim_core::sim::script::{Op, entry_pc};
use hartsim_core::sim::{ProgramSet, RunOutcome, ScriptedExecutor, Simulator};
use hartsim_core::soc::memory::Scratchpad;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::harness::{
    DATA, MEM_SIZE, PAGE, Reluctant, config_with, init_tracing, program, program_set, scripted, small_config,
};

fn li(rd: usize, imm: u64) -> Op {
    Op::Li { rd, imm }
}

fn store(base: usize, src: usize) -> Op {
    Op::Store {
        base,
        offset: 0,
        src,
        width: 8,
    }
}

fn reg(sim: &Simulator, tid: u32, idx: usize) -> u64 {
    sim.threads().get(ThreadId(tid)).unwrap().regs.read(idx)
}

/// Runs `ops` as the only program on one single-hart core.
fn run_main(ops: Vec<Op>) -> Simulator {
    let programs = program_set(vec![program("main", ops)]);
    let mut sim = scripted(&small_config(), ScriptedExecutor::for_cores(1, &programs));
    assert!(matches!(sim.run(Some(1000)).unwrap(), RunOutcome::Finished { .. }));
    sim
}

// ══════════════════════════════════════════════════════════
// 1. Programs
// ══════════════════════════════════════════════════════════

#[rstest]
#[case::wide_store(Op::Store { base: 1, offset: 0, src: 2, width: 9 }, "width 9")]
#[case::empty_load(Op::Load { rd: 1, base: 2, offset: 0, width: 0, signed: false }, "width 0")]
#[case::narrow_amo(Op::Amo { rd: 1, base: 2, offset: 0, src: 3, width: 2, amo: AtomicOp::Add }, "atomic width 2")]
#[case::unknown_spawn(Op::Spawn { rd: 1, program: "ghost".into(), arg: 0 }, "unknown program 'ghost'")]
fn invalid_ops_are_rejected(#[case] op: Op, #[case] why: &str) {
    let err = ProgramSet::new(vec![program("main", vec![li(1, 0), op])]).unwrap_err();
    let ConfigError::Invalid(msg) = err else {
        panic!("expected an invalid-program error, got {err:?}");
    };
    assert!(msg.starts_with("main[1]: "), "{msg}");
    assert!(msg.contains(why), "{msg}");
}

#[test]
fn pc_encodes_program_and_op() {
    let set = ProgramSet::new(vec![
        program("a", vec![li(1, 1)]),
        program("b", vec![li(2, 2), Op::Exit]),
    ])
    .unwrap();
    assert_eq!(entry_pc(1), 1 << 32);
    assert_eq!(set.index("b"), Some(1));
    assert_eq!(set.op_at(entry_pc(1) + 1), Some(&Op::Exit));
    assert_eq!(set.op_at(entry_pc(1) + 2), None);
    assert_eq!(set.op_at(entry_pc(2)), None);
    assert_eq!(set.len(), 2);
}

#[test]
fn ops_parse_from_json() {
    let op: Op = serde_json::from_str(r#"{"op":"load","rd":1,"base":2}"#).unwrap();
    assert_eq!(
        op,
        Op::Load {
            rd: 1,
            base: 2,
            offset: 0,
            width: 8,
            signed: false
        }
    );
    let op: Op = serde_json::from_str(r#"{"op":"store_conditional","rd":3,"base":4,"src":5,"width":4}"#).unwrap();
    assert!(matches!(op, Op::StoreConditional { width: 4, .. }));
    let op: Op = serde_json::from_str(r#"{"op":"scratch_alloc","rd":5,"size":64}"#).unwrap();
    assert_eq!(op, Op::ScratchAlloc { rd: 5, size: 64 });
    assert!(serde_json::from_str::<Op>(r#"{"op":"jump"}"#).is_err());
}

// ══════════════════════════════════════════════════════════
// 2. Semantics
// ══════════════════════════════════════════════════════════

#[test]
fn load_sees_prior_store() {
    let sim = run_main(vec![
        li(5, DATA),
        li(6, 0xFFFF_FFFF_FFFF_FF80),
        store(5, 6),
        Op::Load {
            rd: 7,
            base: 5,
            offset: 0,
            width: 1,
            signed: true,
        },
        Op::Load {
            rd: 8,
            base: 5,
            offset: 0,
            width: 1,
            signed: false,
        },
        Op::Exit,
    ]);
    assert_eq!(reg(&sim, 0, 7), 0xFFFF_FFFF_FFFF_FF80);
    assert_eq!(reg(&sim, 0, 8), 0x80);
}

#[test]
fn load_reserve_then_store_conditional() {
    let sim = run_main(vec![
        li(5, DATA),
        li(6, 7),
        store(5, 6),
        Op::LoadReserve {
            rd: 7,
            base: 5,
            offset: 0,
            width: 8,
        },
        Op::StoreConditional {
            rd: 8,
            base: 5,
            offset: 0,
            src: 6,
            width: 8,
        },
        Op::Exit,
    ]);
    assert_eq!(reg(&sim, 0, 7), 7);
    assert_eq!(reg(&sim, 0, 8), RESERVATION_OK);
    assert_eq!(sim.stats().mem.sc_successes, 1);
}

#[test]
fn word_amo_sign_extends_old_value() {
    let sim = run_main(vec![
        li(5, DATA),
        li(6, 0x8000_0000),
        store(5, 6),
        li(6, 1),
        Op::Amo {
            rd: 7,
            base: 5,
            offset: 0,
            src: 6,
            width: 4,
            amo: AtomicOp::Add,
        },
        Op::Exit,
    ]);
    assert_eq!(reg(&sim, 0, 7), 0xFFFF_FFFF_8000_0000);
    assert_eq!(sim.stats().mem.amos, 1);
}

#[test]
fn heap_ops_allocate_and_free() {
    let sim = run_main(vec![
        Op::Alloc { rd: 5, size: 32 },
        Op::Free { rs: 5, size: 32 },
        Op::Alloc { rd: 6, size: 32 },
        Op::Exit,
    ]);
    assert_eq!(reg(&sim, 0, 5), reg(&sim, 0, 6));
}

#[test]
fn scratchpad_ops_allocate_outside_the_heap() {
    let mut config = small_config();
    config.memory.scratchpad = Some(ScratchpadConfig::default());
    let programs = program_set(vec![program(
        "main",
        vec![
            Op::ScratchAlloc { rd: 5, size: 16 },
            li(6, 9),
            store(5, 6),
            Op::Load {
                rd: 7,
                base: 5,
                offset: 0,
                width: 8,
                signed: false,
            },
            Op::ScratchFree { rs: 5, size: 16 },
            Op::Exit,
        ],
    )]);
    let mut sim = scripted(&config, ScriptedExecutor::for_cores(1, &programs));
    assert!(matches!(sim.run(Some(100)).unwrap(), RunOutcome::Finished { .. }));

    assert_eq!(reg(&sim, 0, 5), 0x0300_0000_0000_0000);
    assert_eq!(reg(&sim, 0, 7), 9);
    assert_eq!(sim.stats().mem.scratchpad_accesses, 2);
    assert_eq!(sim.memory().scratchpad().map(Scratchpad::chunks_in_use), Some(0));
}

#[test]
fn running_off_the_end_exits() {
    let sim = run_main(vec![li(5, 1)]);
    assert!(sim.threads().is_completed(ThreadId(0)));
    assert_eq!(sim.stats().threads_done, 1);
}

#[test]
fn fence_waits_for_controller_queue() {
    let mut config = config_with(BackendKind::Controller, 1, 1);
    config.memory.controller.latency = 3;
    let programs = program_set(vec![program(
        "main",
        vec![li(5, DATA), li(6, 1), store(5, 6), Op::Fence, Op::Exit],
    )]);
    let mut sim = scripted(&config, ScriptedExecutor::for_cores(1, &programs));
    let _ = sim.run(Some(100)).unwrap();
    let cores = sim.stats().core_total();
    assert_eq!(cores.stalls_mem, 2);
    assert_eq!(cores.ops_retired, 5);
}

#[test]
fn refused_accesses_are_issued_again() {
    init_tracing();
    let config = small_config();
    let mut memory = Memory::new(&config.memory, Box::new(Reluctant::new(MEM_SIZE)));
    let _ = memory.add_static_segment(DATA, PAGE).unwrap();
    let _ = memory.init_heap_after_static().unwrap();
    let programs = program_set(vec![program(
        "main",
        vec![
            li(5, DATA),
            li(6, 7),
            store(5, 6),
            Op::Load {
                rd: 7,
                base: 5,
                offset: 0,
                width: 8,
                signed: false,
            },
            Op::Amo {
                rd: 8,
                base: 5,
                offset: 0,
                src: 6,
                width: 8,
                amo: AtomicOp::Add,
            },
            Op::LoadReserve {
                rd: 9,
                base: 5,
                offset: 0,
                width: 8,
            },
            Op::Exit,
        ],
    )]);
    let mut sim = Simulator::new(&config, memory, ScriptedExecutor::for_cores(1, &programs)).unwrap();
    let _ = sim.init_main_thread(entry_pc(0), 0, 0).unwrap();
    assert!(matches!(sim.run(Some(100)).unwrap(), RunOutcome::Finished { .. }));

    assert_eq!(reg(&sim, 0, 7), 7);
    assert_eq!(reg(&sim, 0, 8), 7);
    assert_eq!(reg(&sim, 0, 9), 14);
    let cores = sim.stats().core_total();
    assert_eq!(cores.stalls_mem, 4);
    assert_eq!(cores.ops_retired, 7);
    let mem = &sim.stats().mem;
    assert_eq!(mem.amos, 1);
    assert_eq!(mem.reservations, 1);
    assert_eq!(mem.bytes_written, 16);
}

// ══════════════════════════════════════════════════════════
// 3. Faults
// ══════════════════════════════════════════════════════════

fn run_with_fault(kind: FaultKind, mask: u64, ops: Vec<Op>) -> Simulator {
    let programs = program_set(vec![program("main", ops)]);
    let mut executor = ScriptedExecutor::new(Rc::clone(&programs));
    assert!(executor.inject_fault(kind, mask));
    let mut sim = scripted(&small_config(), vec![Box::new(executor)]);
    let _ = sim.run(Some(100)).unwrap();
    sim
}

#[test]
fn decode_fault_drops_next_op() {
    let sim = run_with_fault(FaultKind::Decode, 1, vec![li(5, 1), li(6, 2), Op::Exit]);
    assert_eq!(reg(&sim, 0, 5), 0);
    assert_eq!(reg(&sim, 0, 6), 2);
}

#[test]
fn alu_fault_flips_next_result() {
    let sim = run_with_fault(FaultKind::Alu, 0b100, vec![li(5, 1), li(6, 2), Op::Exit]);
    assert_eq!(reg(&sim, 0, 5), 0b101);
    assert_eq!(reg(&sim, 0, 6), 2);
}

#[test]
fn memory_faults_are_not_for_executors() {
    let mut executor = ScriptedExecutor::new(Rc::new(ProgramSet::default()));
    assert!(!executor.inject_fault(FaultKind::Mem, 1));
    assert!(!executor.inject_fault(FaultKind::All, 1));
    assert_eq!(executor.take_stats().faults_injected, 0);
}
