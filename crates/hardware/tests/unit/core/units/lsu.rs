//! Load/Store Unit Tests.
//!
//! Verifies the AMO ALU, the reservation table and the future set.

use hartsim_core::common::MemFault;
use hartsim_core::common::constants::RESERVATION_FAIL;
use hartsim_core::core::units::lsu::{
    AccessFlags, AmoWidth, AtomicOp, FutureSet, ReservationTable, ScCheck, apply_atomic, atomic_alu,
};
use hartsim_core::soc::memory::request::Target;
use pretty_assertions::assert_eq;
use rstest::rstest;

// ══════════════════════════════════════════════════════════
// 1. AMO ALU
// ══════════════════════════════════════════════════════════

#[rstest]
#[case::swap(AtomicOp::Swap, 5, 9, 9)]
#[case::add_overflows_into_sign(AtomicOp::Add, 0x7FFF_FFFF, 1, 0xFFFF_FFFF_8000_0000)]
#[case::add_ignores_upper_bits(AtomicOp::Add, 0x1_0000_0001, 1, 2)]
#[case::xor(AtomicOp::Xor, 0b1100, 0b1010, 0b0110)]
#[case::and(AtomicOp::And, 0b1100, 0b1010, 0b1000)]
#[case::or(AtomicOp::Or, 0b1100, 0b1010, 0b1110)]
#[case::min_signed(AtomicOp::Min, 0xFFFF_FFFF, 1, u64::MAX)]
#[case::max_signed(AtomicOp::Max, 0xFFFF_FFFF, 1, 1)]
#[case::min_unsigned(AtomicOp::Minu, 0xFFFF_FFFF, 1, 1)]
#[case::max_unsigned(AtomicOp::Maxu, 0xFFFF_FFFF, 1, u64::MAX)]
fn word_alu(#[case] op: AtomicOp, #[case] mem: u64, #[case] operand: u64, #[case] expected: u64) {
    assert_eq!(atomic_alu(op, mem, operand, AmoWidth::Word), expected);
}

#[rstest]
#[case::swap(AtomicOp::Swap, 5, 9, 9)]
#[case::add_wraps(AtomicOp::Add, u64::MAX, 1, 0)]
#[case::add_keeps_upper_bits(AtomicOp::Add, 0x1_0000_0001, 1, 0x1_0000_0002)]
#[case::min_signed(AtomicOp::Min, u64::MAX, 1, u64::MAX)]
#[case::max_signed(AtomicOp::Max, u64::MAX, 1, 1)]
#[case::min_unsigned(AtomicOp::Minu, u64::MAX, 1, 1)]
#[case::max_unsigned(AtomicOp::Maxu, u64::MAX, 1, u64::MAX)]
fn double_alu(#[case] op: AtomicOp, #[case] mem: u64, #[case] operand: u64, #[case] expected: u64) {
    assert_eq!(atomic_alu(op, mem, operand, AmoWidth::Double), expected);
}

#[test]
fn apply_atomic_returns_old_value() {
    let mut word = [1u8, 0, 0, 0];
    assert_eq!(apply_atomic(AtomicOp::Add, &mut word, 2).unwrap(), 1);
    assert_eq!(word, [3, 0, 0, 0]);

    let mut word = [0xFFu8; 4];
    assert_eq!(apply_atomic(AtomicOp::Add, &mut word, 1).unwrap(), 0xFFFF_FFFF);
    assert_eq!(word, [0; 4]);

    let mut double = 40u64.to_le_bytes();
    assert_eq!(apply_atomic(AtomicOp::Swap, &mut double, 7).unwrap(), 40);
    assert_eq!(u64::from_le_bytes(double), 7);
}

#[test]
fn apply_atomic_rejects_other_widths() {
    let mut bytes = [0u8; 3];
    assert_eq!(
        apply_atomic(AtomicOp::Add, &mut bytes, 1),
        Err(MemFault::AtomicWidth(3))
    );
    assert_eq!(AmoWidth::from_bytes(2), Err(MemFault::AtomicWidth(2)));
    assert_eq!(AmoWidth::from_bytes(8).unwrap().bytes(), 8);
}

#[test]
fn atomic_op_names() {
    let op: AtomicOp = serde_json::from_str("\"maxu\"").unwrap();
    assert_eq!(op, AtomicOp::Maxu);
    assert!(serde_json::from_str::<AtomicOp>("\"Add\"").is_err());
}

// ══════════════════════════════════════════════════════════
// 2. Reservations
// ══════════════════════════════════════════════════════════

#[test]
fn access_flag_bits() {
    assert_eq!(AccessFlags::default().bits(), 0);
    let acquire = AccessFlags {
        acquire: true,
        release: false,
    };
    let both = AccessFlags {
        acquire: true,
        release: true,
    };
    assert_eq!(acquire.bits(), 1);
    assert_eq!(both.bits(), 3);
}

#[test]
fn one_reservation_per_address() {
    let mut table = ReservationTable::new();
    let first = Target::new(8);
    let second = Target::new(8);
    assert!(table.reserve(0, 0x2000, 8, AccessFlags::default(), &first));
    assert!(!table.reserve(1, 0x2000, 8, AccessFlags::default(), &second));
    assert_eq!(second.value(), RESERVATION_FAIL);
    assert_eq!(table.holder(0x2000), Some(0));
    assert!(table.reserve(1, 0x2008, 8, AccessFlags::default(), &second));
    assert_eq!(table.len(), 2);
}

#[test]
fn check_matches_on_shared_bits() {
    let mut table = ReservationTable::new();
    let target = Target::new(8);
    assert!(table.reserve(0, 0x2000, 8, AccessFlags::default(), &target));
    target.set_value(0b0101);
    assert_eq!(table.check(0, 0x2000, 0b0001), ScCheck::Match);
    assert_eq!(table.check(0, 0x2000, 0b1010), ScCheck::Mismatch);
    assert_eq!(table.check(1, 0x2000, 0b0001), ScCheck::NoReservation);
    assert_eq!(table.check(0, 0x2008, 0b0001), ScCheck::NoReservation);
}

#[test]
fn consume_removes_reservation() {
    let mut table = ReservationTable::new();
    let target = Target::new(8);
    assert!(table.reserve(3, 0x40, 8, AccessFlags::default(), &target));
    assert!(table.consume(1, 0x40).is_none());
    let held = table.consume(3, 0x40).unwrap();
    assert_eq!((held.hart, held.addr, held.len), (3, 0x40, 8));
    assert!(held.target.same(&target));
    assert!(table.is_empty());
}

#[test]
fn overlapping_write_revokes() {
    let mut table = ReservationTable::new();
    let target = Target::new(8);
    assert!(table.reserve(0, 0x100, 8, AccessFlags::default(), &target));
    assert_eq!(table.invalidate(0x108, 8), 0);
    assert_eq!(table.invalidate(0xF8, 8), 0);
    assert_eq!(table.invalidate(0x104, 1), 1);
    assert_eq!(table.holder(0x100), None);
}

// ══════════════════════════════════════════════════════════
// 3. Futures
// ══════════════════════════════════════════════════════════

#[test]
fn future_set_and_revoke() {
    let mut futures = FutureSet::new();
    assert!(futures.set(0x10));
    assert!(futures.set(0x10));
    assert_eq!(futures.len(), 1);
    assert!(futures.status(0x10));
    assert!(futures.revoke(0x10));
    assert!(!futures.revoke(0x10));
    assert!(futures.is_empty());
}

#[test]
fn revoke_range_is_half_open() {
    let mut futures = FutureSet::new();
    for addr in [0x110, 0x100, 0xF8, 0x108] {
        let _ = futures.set(addr);
    }
    assert_eq!(futures.revoke_range(0x100, 0x10), 2);
    assert_eq!(futures.iter().collect::<Vec<_>>(), vec![0xF8, 0x110]);
}
