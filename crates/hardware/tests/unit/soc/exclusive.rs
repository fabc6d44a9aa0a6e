//! Exclusive Access Unit Tests.
//!
//! Load-reserve/store-conditional, atomics and exclusive futures on the
//! memory façade.

use hartsim_core::Memory;
use hartsim_core::common::constants::{RESERVATION_FAIL, RESERVATION_OK};
use hartsim_core::common::{DataFlag, MemFault, ReqKind};
use hartsim_core::core::units::lsu::AccessFlags;
use hartsim_core::soc::memory::Target;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::harness::{memory_with_static, tracked};

const ADDR: u64 = 0x2000;

/// Memory with a segment at `ADDR` holding `value` in its first eight bytes.
fn memory_holding(value: u64) -> Memory {
    let mut memory = memory_with_static(ADDR, 0x100);
    let _ = memory.write(0, ADDR, &value.to_le_bytes(), DataFlag::None).unwrap();
    memory
}

fn read_u64(memory: &mut Memory, vaddr: u64) -> u64 {
    let target = Target::new(8);
    let (req, _) = tracked(ReqKind::Read, 0);
    let _ = memory.read(0, vaddr, 8, &target, req, DataFlag::None).unwrap();
    target.value()
}

fn load_reserve(memory: &mut Memory, hart: usize) -> (bool, Target) {
    let target = Target::new(8);
    let (req, done) = tracked(ReqKind::Read, hart);
    let ok = memory
        .load_reserve(hart, ADDR, &target, AccessFlags::default(), req, DataFlag::None)
        .unwrap();
    assert_eq!(done.get(), 1);
    (ok, target)
}

fn store_conditional(memory: &mut Memory, hart: usize, data: u64) -> (bool, u64) {
    let status = Target::new(8);
    let ok = memory
        .store_conditional(hart, ADDR, data, 8, &status, AccessFlags::default())
        .unwrap();
    (ok, status.value())
}

// ══════════════════════════════════════════════════════════
// 1. Load-reserve / store-conditional
// ══════════════════════════════════════════════════════════

#[test]
fn second_reserver_fails_and_holder_succeeds() {
    let mut memory = memory_holding(0xFF);

    let (ok, loaded) = load_reserve(&mut memory, 0);
    assert!(ok);
    assert_eq!(loaded.value(), 0xFF);

    let (ok, conflict) = load_reserve(&mut memory, 1);
    assert!(!ok);
    assert_eq!(conflict.value(), RESERVATION_FAIL);

    assert_eq!(store_conditional(&mut memory, 0, 0x0F), (true, RESERVATION_OK));
    assert!(memory.reservations().is_empty());
    assert_eq!(read_u64(&mut memory, ADDR), 0x0F);

    let stats = memory.stats();
    assert_eq!(stats.reservations, 1);
    assert_eq!(stats.reservation_conflicts, 1);
    assert_eq!(stats.sc_successes, 1);
}

#[test]
fn mismatched_data_keeps_reservation() {
    let mut memory = memory_holding(0xFF);
    let _ = load_reserve(&mut memory, 0);
    assert_eq!(store_conditional(&mut memory, 0, 0x100), (false, RESERVATION_FAIL));
    assert_eq!(memory.reservations().holder(ADDR), Some(0));
    assert_eq!(read_u64(&mut memory, ADDR), 0xFF);
    assert_eq!(store_conditional(&mut memory, 0, 0x1), (true, RESERVATION_OK));
}

#[test]
fn store_conditional_without_reservation_fails() {
    let mut memory = memory_holding(0xFF);
    assert_eq!(store_conditional(&mut memory, 2, 0xFF), (false, RESERVATION_FAIL));
    let _ = load_reserve(&mut memory, 0);
    assert_eq!(store_conditional(&mut memory, 1, 0xFF), (false, RESERVATION_FAIL));
    assert_eq!(memory.stats().sc_failures, 2);
}

#[test]
fn overlapping_write_revokes_reservation() {
    let mut memory = memory_holding(0xFF);
    let _ = load_reserve(&mut memory, 0);
    let _ = memory.write(1, ADDR + 7, &[0], DataFlag::None).unwrap();
    assert_eq!(memory.reservations().holder(ADDR), None);
    assert_eq!(store_conditional(&mut memory, 0, 0xFF), (false, RESERVATION_FAIL));
}

#[test]
fn failed_load_reserve_leaves_no_reservation() {
    let mut memory = memory_with_static(ADDR, 0x100);
    let target = Target::new(8);
    let (req, _) = tracked(ReqKind::Read, 0);
    assert_eq!(
        memory.load_reserve(0, 0x9000, &target, AccessFlags::default(), req, DataFlag::None),
        Err(MemFault::SegFault { vaddr: 0x9000 })
    );
    assert!(memory.reservations().is_empty());
}

// ══════════════════════════════════════════════════════════
// 2. Futures
// ══════════════════════════════════════════════════════════

#[test]
fn write_revokes_futures_in_range() {
    let mut memory = memory_holding(0);
    assert!(memory.set_future(ADDR + 0x10));
    assert!(memory.set_future(ADDR + 0x40));
    assert!(memory.status_future(ADDR + 0x10));

    let _ = memory.write(0, ADDR + 0x10, &[1; 8], DataFlag::None).unwrap();
    assert!(!memory.status_future(ADDR + 0x10));
    assert!(memory.status_future(ADDR + 0x40));
    assert_eq!(memory.stats().futures_revoked, 1);

    assert!(memory.revoke_future(ADDR + 0x40));
    assert!(!memory.revoke_future(ADDR + 0x40));
}

// ══════════════════════════════════════════════════════════
// 3. Atomics
// ══════════════════════════════════════════════════════════

#[rstest]
#[case::add(DataFlag::AtomicAdd, 10, 5, 15)]
#[case::swap(DataFlag::AtomicSwap, 10, 5, 5)]
#[case::and(DataFlag::AtomicAnd, 0b1100, 0b1010, 0b1000)]
#[case::signed_min(DataFlag::AtomicMin, 3, u64::MAX, u64::MAX)]
#[case::unsigned_min(DataFlag::AtomicUMin, 3, u64::MAX, 3)]
fn amo_returns_old_and_stores_new(
    #[case] flag: DataFlag,
    #[case] initial: u64,
    #[case] operand: u64,
    #[case] stored: u64,
) {
    let mut memory = memory_holding(initial);
    let target = Target::new(8);
    let (req, done) = tracked(ReqKind::Atomic, 0);
    assert!(memory.amo(0, ADDR, operand, flag, &target, req).unwrap());
    assert_eq!(done.get(), 1);
    assert_eq!(target.value(), initial);
    assert_eq!(read_u64(&mut memory, ADDR), stored);
    assert_eq!(memory.stats().amos, 1);
}

#[test]
fn word_amo_touches_only_four_bytes() {
    let mut memory = memory_holding(0xAAAA_AAAA_7FFF_FFFF);
    let target = Target::new(4);
    let (req, _) = tracked(ReqKind::Atomic, 0);
    let _ = memory.amo(0, ADDR, 1, DataFlag::AtomicAdd, &target, req).unwrap();
    assert_eq!(target.value(), 0x7FFF_FFFF);
    assert_eq!(read_u64(&mut memory, ADDR), 0xAAAA_AAAA_8000_0000);
}

#[test]
fn amo_revokes_reservation() {
    let mut memory = memory_holding(1);
    let _ = load_reserve(&mut memory, 0);
    let (req, _) = tracked(ReqKind::Atomic, 1);
    let _ = memory
        .amo(1, ADDR, 1, DataFlag::AtomicOr, &Target::new(8), req)
        .unwrap();
    assert!(memory.reservations().is_empty());
}

#[test]
fn amo_argument_errors() {
    let mut memory = memory_holding(0);
    let (req, _) = tracked(ReqKind::Atomic, 0);
    assert_eq!(
        memory.amo(0, ADDR, 1, DataFlag::AtomicAdd, &Target::new(2), req),
        Err(MemFault::AtomicWidth(2))
    );
    let (req, _) = tracked(ReqKind::Atomic, 0);
    assert_eq!(
        memory.amo(0, ADDR + 4, 1, DataFlag::AtomicAdd, &Target::new(8), req),
        Err(MemFault::MisalignedAtomic {
            vaddr: ADDR + 4,
            width: 8
        })
    );
    let (req, done) = tracked(ReqKind::Atomic, 0);
    assert_eq!(
        memory.amo(0, ADDR, 1, DataFlag::SignExtend, &Target::new(8), req),
        Err(MemFault::NotAtomic {
            vaddr: ADDR,
            flag: DataFlag::SignExtend
        })
    );
    assert_eq!(done.get(), 0);
    assert_eq!(memory.stats().amos, 0);
}
