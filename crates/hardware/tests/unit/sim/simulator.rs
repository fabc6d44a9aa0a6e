//! Simulator Unit Tests.
//!
//! Run outcomes, fatal-error halting and thread migration through the
//! scripted executor.

use std::fs;
use std::path::Path;

use hartsim_core::common::{MemFault, SchedError, SimError};
use hartsim_core::config::{BackendKind, Config, DumpRange};
use hartsim_core::core::{ThreadId, ThreadState};
use hartsim_core::sim::script::{Op, entry_pc};
use hartsim_core::sim::{RunOutcome, ScriptedExecutor, Simulator};
use hartsim_core::soc::memory::remote::{LoopbackLink, NodeId};
use pretty_assertions::assert_eq;

use crate::common::harness::{
    DATA, ExitAfter, MEM_SIZE, PAGE, config_with, init_tracing, program, program_set, scripted, small_config,
};

fn li(rd: usize, imm: u64) -> Op {
    Op::Li { rd, imm }
}

// ══════════════════════════════════════════════════════════
// 1. Run outcomes
// ══════════════════════════════════════════════════════════

#[test]
fn cycle_limit_then_resume() {
    let programs = program_set(vec![program("main", (0..8).map(|i| li(5, i)).collect())]);
    let mut sim = scripted(&small_config(), ScriptedExecutor::for_cores(1, &programs));
    assert_eq!(sim.run(Some(3)).unwrap(), RunOutcome::CycleLimit { cycles: 3 });
    assert_eq!(sim.cycle(), 3);
    assert!(matches!(sim.run(None).unwrap(), RunOutcome::Finished { .. }));
    assert_eq!(sim.stats().threads_done, 1);
    assert!(!sim.tick().unwrap());
}

#[test]
fn executor_count_must_match_cores() {
    init_tracing();
    let config = config_with(BackendKind::Local, 2, 1);
    let err = Simulator::from_config(&config, None, ExitAfter::boxed(1, 1)).unwrap_err();
    assert!(matches!(
        err,
        SimError::Sched(SchedError::ExecutorCount {
            cores: 2,
            executors: 1
        })
    ));
}

#[test]
fn fatal_fault_halts_the_run() {
    let programs = program_set(vec![program(
        "main",
        vec![
            li(5, 0x9_0000),
            Op::Load {
                rd: 6,
                base: 5,
                offset: 0,
                width: 8,
                signed: false,
            },
            Op::Exit,
        ],
    )]);
    let mut sim = scripted(&small_config(), ScriptedExecutor::for_cores(1, &programs));
    assert!(sim.tick().unwrap());
    let err = sim.tick().unwrap_err();
    assert!(
        matches!(err, SimError::Mem(MemFault::SegFault { vaddr: 0x9_0000 })),
        "{err}"
    );
    assert!(sim.is_halted());
    assert!(!sim.tick().unwrap());
    assert_eq!(sim.cycle(), 2);
}

#[test]
fn spawned_thread_runs_on_second_core() {
    let programs = program_set(vec![
        program(
            "main",
            vec![
                li(5, DATA),
                Op::Spawn {
                    rd: 8,
                    program: "child".into(),
                    arg: 5,
                },
                Op::Join { rs: 8 },
                Op::Load {
                    rd: 9,
                    base: 5,
                    offset: 0,
                    width: 8,
                    signed: false,
                },
                Op::Exit,
            ],
        ),
        program(
            "child",
            vec![
                li(6, 99),
                Op::Store {
                    base: 10,
                    offset: 0,
                    src: 6,
                    width: 8,
                },
                Op::Exit,
            ],
        ),
    ]);
    let mut sim = scripted(
        &config_with(BackendKind::Local, 2, 1),
        ScriptedExecutor::for_cores(2, &programs),
    );
    assert!(matches!(sim.run(Some(100)).unwrap(), RunOutcome::Finished { .. }));

    let main = sim.threads().get(ThreadId(0)).unwrap();
    assert_eq!(main.regs.read(8), 1);
    assert_eq!(main.regs.read(9), 99);
    let child = sim.threads().get(ThreadId(1)).unwrap();
    assert_eq!(child.parent, Some(ThreadId(0)));
    assert_eq!(child.regs.read(10), DATA);
    assert_eq!(sim.stats().threads_done, 2);
    assert!(sim.stats().cores.iter().all(|c| c.ops_retired > 0));
}

// ══════════════════════════════════════════════════════════
// 2. Migration
// ══════════════════════════════════════════════════════════

#[test]
fn thread_migrates_to_remote_node() {
    init_tracing();
    let remote_addr = (1u64 << 62) | (1 << 56);
    let programs = program_set(vec![program(
        "main",
        vec![li(5, remote_addr), Op::Migrate { base: 5, offset: 0 }, Op::Exit],
    )]);
    let link = LoopbackLink::new(MEM_SIZE).unwrap();
    let fabric = link.clone();
    let config = config_with(BackendKind::Remote, 1, 1);
    let mut sim = Simulator::from_config(&config, Some(Box::new(link)), ScriptedExecutor::for_cores(1, &programs))
        .unwrap();
    let memory = sim.memory_mut();
    let _ = memory.add_static_segment(DATA, PAGE).unwrap();
    let _ = memory.init_heap_after_static().unwrap();
    let main = sim.init_main_thread(entry_pc(0), 0, 0).unwrap();

    assert!(matches!(sim.run(Some(100)).unwrap(), RunOutcome::Finished { .. }));

    let migrations = fabric.migrations();
    assert_eq!(migrations.len(), 1);
    let (dest, payload) = &migrations[0];
    assert_eq!(*dest, NodeId { zone: 1, precinct: 0 });
    assert_eq!(payload.tid, main.0);
    assert_eq!(payload.pc, entry_pc(0) + 2);
    assert_eq!(payload.gprs[4], remote_addr);
    assert_eq!(sim.threads().state(main), Some(ThreadState::Migrated));
    assert_eq!(sim.stats().threads_migrated, 1);
    assert_eq!(sim.stats().threads_done, 0);
}

#[test]
fn local_address_does_not_migrate() {
    let programs = program_set(vec![program(
        "main",
        vec![li(5, DATA), Op::Migrate { base: 5, offset: 0 }, Op::Exit],
    )]);
    let mut sim = scripted(&small_config(), ScriptedExecutor::for_cores(1, &programs));
    let _ = sim.run(Some(100)).unwrap();
    assert_eq!(sim.threads().state(ThreadId(0)), Some(ThreadState::Done));
    assert_eq!(sim.stats().threads_migrated, 0);
}

// ══════════════════════════════════════════════════════════
// 3. Memory dumps
// ══════════════════════════════════════════════════════════

fn dump_config(dir: &Path) -> Config {
    let mut config = small_config();
    config.memory.dump_dir = dir.to_path_buf();
    config.memory.dump_ranges = vec![DumpRange {
        name: "data".into(),
        base: DATA,
        size: 20,
    }];
    config
}

#[test]
fn dump_ranges_written_before_and_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let programs = program_set(vec![program(
        "main",
        vec![
            li(5, DATA),
            li(6, 0x2a),
            Op::Store {
                base: 5,
                offset: 0,
                src: 6,
                width: 8,
            },
            Op::Exit,
        ],
    )]);
    let mut sim = scripted(&dump_config(dir.path()), ScriptedExecutor::for_cores(1, &programs));
    assert!(matches!(sim.run(Some(100)).unwrap(), RunOutcome::Finished { .. }));

    let init = fs::read_to_string(dir.path().join("data.dump.init")).unwrap();
    assert_eq!(
        init,
        format!(
            "0x0000000000001000:{}\n0x0000000000001010:{}\n",
            " 00".repeat(16),
            " 00".repeat(4)
        )
    );
    let last = fs::read_to_string(dir.path().join("data.dump.final")).unwrap();
    assert_eq!(
        last,
        format!(
            "0x0000000000001000: 2a{}\n0x0000000000001010:{}\n",
            " 00".repeat(15),
            " 00".repeat(4)
        )
    );
}

#[test]
fn unwritable_dump_halts_the_first_tick() {
    let dir = tempfile::tempdir().unwrap();
    let programs = program_set(vec![program("main", vec![Op::Exit])]);
    let config = dump_config(&dir.path().join("missing"));
    let mut sim = scripted(&config, ScriptedExecutor::for_cores(1, &programs));
    let err = sim.tick().unwrap_err();
    assert!(
        matches!(err, SimError::Dump { ref path, .. } if path.ends_with("data.dump.init")),
        "{err}"
    );
    assert!(sim.is_halted());
    assert!(!sim.tick().unwrap());
    assert_eq!(sim.stats().threads_done, 0);
}
