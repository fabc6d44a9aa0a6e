//! Thread Table Unit Tests.
//!
//! Verifies creation, the lifecycle checks, join wake-ups and the completed map.

use hartsim_core::common::SchedError;
use hartsim_core::common::reg::{REG_SP, REG_TP};
use hartsim_core::core::{ThreadId, ThreadState, ThreadTable};
use pretty_assertions::assert_eq;

// ══════════════════════════════════════════════════════════
// 1. Creation
// ══════════════════════════════════════════════════════════

#[test]
fn ids_are_issued_in_order() {
    let mut table = ThreadTable::new();
    let a = table.create(None, 0x100, 0x8000, None);
    let b = table.create(Some(a), 0x200, 0x7000, None);
    assert_eq!(a, ThreadId(0));
    assert_eq!(b, ThreadId(1));
    assert_eq!(table.get(b).unwrap().parent, Some(a));
    assert_eq!(table.len(), 2);
}

#[test]
fn created_thread_is_ready_with_pc_and_stack() {
    let mut table = ThreadTable::new();
    let tid = table.create(None, 0x4000, 0x8008, None);
    let thread = table.get(tid).unwrap();
    assert_eq!(thread.state, ThreadState::Ready);
    assert_eq!(thread.regs.pc, 0x4000);
    assert_eq!(thread.regs.read(REG_SP), 0x8000);
    assert_eq!(thread.regs.read(REG_TP), 0x8000);
    assert_eq!(table.ready(), vec![tid]);
}

#[test]
fn create_blocked_needs_known_target() {
    let mut table = ThreadTable::new();
    let err = table.create_blocked(None, 0, 0x8000, ThreadId(9)).unwrap_err();
    assert_eq!(err, SchedError::UnknownThread(ThreadId(9)));
    assert!(table.is_empty());
}

#[test]
fn create_blocked_waits_on_target() {
    let mut table = ThreadTable::new();
    let b = table.create(None, 0, 0x8000, None);
    let a = table.create_blocked(None, 0, 0x7000, b).unwrap();
    assert_eq!(table.state(a), Some(ThreadState::Blocked));
    assert_eq!(table.get(a).unwrap().waiting_on, Some(b));
    assert_eq!(table.blocked(), &[a]);
    assert_eq!(table.ready(), vec![b]);
}

// ══════════════════════════════════════════════════════════
// 2. Lifecycle
// ══════════════════════════════════════════════════════════

#[test]
fn pop_ready_marks_running() {
    let mut table = ThreadTable::new();
    let tid = table.create(None, 0, 0x8000, None);
    assert_eq!(table.pop_ready(0).unwrap(), Some(tid));
    assert_eq!(table.state(tid), Some(ThreadState::Running));
    assert!(table.ready_is_empty());
    assert_eq!(table.pop_ready(0).unwrap(), None);
}

#[test]
fn requeue_appends_to_ready_tail() {
    let mut table = ThreadTable::new();
    let a = table.create(None, 0, 0x8000, None);
    let b = table.create(None, 0, 0x7000, None);
    let _ = table.pop_ready(0).unwrap();
    table.requeue(a, 0).unwrap();
    assert_eq!(table.ready(), vec![b, a]);
}

#[test]
fn ready_thread_cannot_complete() {
    let mut table = ThreadTable::new();
    let tid = table.create(None, 0, 0x8000, None);
    let err = table.complete(tid, 3, ThreadState::Done).unwrap_err();
    assert_eq!(
        err,
        SchedError::ImpossibleTransition {
            tid,
            core: 3,
            from: ThreadState::Ready,
            to: ThreadState::Done,
        }
    );
    assert!(!table.is_completed(tid));
}

#[test]
fn complete_rejects_non_terminal_state() {
    let mut table = ThreadTable::new();
    let tid = table.create(None, 0, 0x8000, None);
    let _ = table.pop_ready(0).unwrap();
    assert!(matches!(
        table.complete(tid, 0, ThreadState::Ready),
        Err(SchedError::ImpossibleTransition { .. })
    ));
}

#[test]
fn done_thread_never_runs_again() {
    let mut table = ThreadTable::new();
    let tid = table.create(None, 0, 0x8000, None);
    let _ = table.pop_ready(0).unwrap();
    table.complete(tid, 0, ThreadState::Done).unwrap();
    assert!(table.transition(tid, 0, ThreadState::Running).is_err());
    assert!(table.requeue(tid, 0).is_err());
}

#[test]
fn transition_of_unknown_thread() {
    let mut table = ThreadTable::new();
    assert_eq!(
        table.transition(ThreadId(4), 0, ThreadState::Ready),
        Err(SchedError::UnknownThread(ThreadId(4)))
    );
}

#[test]
fn migrated_threads_are_completed() {
    let mut table = ThreadTable::new();
    let tid = table.create(None, 0, 0x8000, None);
    let _ = table.pop_ready(0).unwrap();
    table.complete(tid, 0, ThreadState::Migrated).unwrap();
    assert_eq!(table.completed().get(&tid), Some(&ThreadState::Migrated));
}

// ══════════════════════════════════════════════════════════
// 3. Join
// ══════════════════════════════════════════════════════════

#[test]
fn block_rejects_unknown_target() {
    let mut table = ThreadTable::new();
    let tid = table.create(None, 0, 0x8000, None);
    let _ = table.pop_ready(0).unwrap();
    assert_eq!(
        table.block(tid, 0, ThreadId(7)),
        Err(SchedError::UnknownThread(ThreadId(7)))
    );
}

#[test]
fn check_blocked_waits_for_completion() {
    let mut table = ThreadTable::new();
    let target = table.create(None, 0, 0x8000, None);
    let waiter = table.create_blocked(None, 0, 0x7000, target).unwrap();

    assert!(table.check_blocked().is_empty());
    assert_eq!(table.state(waiter), Some(ThreadState::Blocked));

    let _ = table.pop_ready(0).unwrap();
    table.complete(target, 0, ThreadState::Done).unwrap();
    assert_eq!(table.check_blocked(), vec![waiter]);
    assert_eq!(table.state(waiter), Some(ThreadState::Ready));
    assert_eq!(table.get(waiter).unwrap().waiting_on, None);
    assert!(table.blocked_is_empty());
    assert_eq!(table.ready(), vec![waiter]);
}

#[test]
fn woken_threads_keep_blocking_order() {
    let mut table = ThreadTable::new();
    let target = table.create(None, 0, 0x8000, None);
    let other = table.create(None, 0, 0x7000, None);
    let w1 = table.create_blocked(None, 0, 0x6000, target).unwrap();
    let w2 = table.create_blocked(None, 0, 0x5000, other).unwrap();
    let w3 = table.create_blocked(None, 0, 0x4000, target).unwrap();

    let _ = table.pop_ready(0).unwrap();
    table.complete(target, 0, ThreadState::Done).unwrap();
    assert_eq!(table.check_blocked(), vec![w1, w3]);
    assert_eq!(table.blocked(), &[w2]);
    assert_eq!(table.ready(), vec![other, w1, w3]);
}

#[test]
fn join_on_migrated_thread_is_satisfied() {
    let mut table = ThreadTable::new();
    let target = table.create(None, 0, 0x8000, None);
    let waiter = table.create_blocked(None, 0, 0x7000, target).unwrap();
    let _ = table.pop_ready(0).unwrap();
    table.complete(target, 0, ThreadState::Migrated).unwrap();
    assert_eq!(table.check_blocked(), vec![waiter]);
}
