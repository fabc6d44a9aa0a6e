//! Memory Access Unit Tests.
//!
//! Plain reads and writes through the translator and the local backend.

use hartsim_core::common::{DataFlag, MemFault, ReqKind};
use hartsim_core::soc::memory::Target;
use pretty_assertions::assert_eq;

use crate::common::harness::{memory_with_static, tracked};

#[test]
fn write_then_read_round_trips() {
    let mut memory = memory_with_static(0x1000, 0x100);
    assert!(memory.write(0, 0x1004, &0xDEAD_BEEFu32.to_le_bytes(), DataFlag::None).unwrap());

    let target = Target::new(4);
    let (req, done) = tracked(ReqKind::Read, 0);
    assert!(memory.read(0, 0x1004, 4, &target, req, DataFlag::None).unwrap());
    assert_eq!(done.get(), 1);
    assert_eq!(target.value(), 0xDEAD_BEEF);
}

#[test]
fn page_crossing_access_completes_once() {
    let mut memory = memory_with_static(0x1000, 0x2000);
    // Touch the upper page first so the two halves land on non-adjacent frames.
    let _ = memory.translate(0x2000).unwrap();
    let value = 0x1122_3344_5566_7788u64;
    let _ = memory.write(0, 0x1FFC, &value.to_le_bytes(), DataFlag::None).unwrap();

    let target = Target::new(8);
    let (req, done) = tracked(ReqKind::Read, 0);
    let _ = memory.read(0, 0x1FFC, 8, &target, req, DataFlag::None).unwrap();
    assert_eq!(done.get(), 1);
    assert_eq!(target.value(), value);
    assert_eq!(memory.stats().split_accesses, 2);
}

#[test]
fn loads_widen_by_flag() {
    let mut memory = memory_with_static(0x1000, 0x100);
    let _ = memory.write(0, 0x1000, &[0xFE], DataFlag::None).unwrap();
    let target = Target::new(1);
    let (req, _) = tracked(ReqKind::Read, 0);
    let _ = memory.read(0, 0x1000, 1, &target, req, DataFlag::SignExtend).unwrap();
    assert_eq!(target.extended(DataFlag::SignExtend), (-2i64) as u64);
    assert_eq!(target.extended(DataFlag::ZeroExtend), 0xFE);
}

#[test]
fn target_too_small() {
    let mut memory = memory_with_static(0x1000, 0x100);
    let target = Target::new(2);
    let (req, done) = tracked(ReqKind::Read, 0);
    assert_eq!(
        memory.read(0, 0x1000, 4, &target, req, DataFlag::None),
        Err(MemFault::TargetTooSmall { len: 4, capacity: 2 })
    );
    assert_eq!(done.get(), 0);
}

#[test]
fn zero_length_read_completes_immediately() {
    let mut memory = memory_with_static(0x1000, 0x100);
    let (req, done) = tracked(ReqKind::Read, 0);
    // No translation happens, so even an unmapped address is fine.
    assert!(memory.read(0, 0x9_0000, 0, &Target::new(0), req, DataFlag::None).unwrap());
    assert_eq!(done.get(), 1);
    assert_eq!(memory.stats().tlb_misses, 0);
}

#[test]
fn unmapped_access_issues_nothing() {
    let mut memory = memory_with_static(0x1000, 0x100);
    let target = Target::new(4);
    let (req, done) = tracked(ReqKind::Read, 0);
    assert_eq!(
        memory.read(0, 0x5000, 4, &target, req, DataFlag::None),
        Err(MemFault::SegFault { vaddr: 0x5000 })
    );
    assert_eq!(
        memory.write(0, 0x50FE, &[1, 2, 3, 4], DataFlag::None),
        Err(MemFault::SegFault { vaddr: 0x50FE })
    );
    assert_eq!(done.get(), 0);
    let stats = memory.stats();
    assert_eq!((stats.bytes_read, stats.bytes_written), (0, 0));
}

#[test]
fn heap_memory_is_usable() {
    let mut memory = memory_with_static(0x1000, 0x100);
    let base = memory.allocate(64).unwrap();
    let _ = memory.write(0, base + 8, &7u64.to_le_bytes(), DataFlag::None).unwrap();
    let target = Target::new(8);
    let (req, _) = tracked(ReqKind::Read, 0);
    let _ = memory.read(0, base + 8, 8, &target, req, DataFlag::None).unwrap();
    assert_eq!(target.value(), 7);
    let stats = memory.stats();
    assert_eq!((stats.bytes_read, stats.bytes_written), (8, 8));
}

#[test]
fn dump_memory_shows_untouched_pages_as_zero() {
    let mut memory = memory_with_static(0x1000, 0x100);
    let _ = memory.write(0, 0x1000, &[1, 2, 3, 4, 5], DataFlag::None).unwrap();
    assert_eq!(
        memory.dump_memory(0x1000, 5, 4),
        "0x0000000000001000: 01 02 03 04\n0x0000000000001004: 05\n"
    );
    assert_eq!(memory.dump_memory(0x8000, 2, 8), "0x0000000000008000: 00 00\n");
}

#[test]
fn dump_segments_lists_static_and_heap() {
    let memory = memory_with_static(0x1000, 0x100);
    let dump = memory.dump_segments();
    assert!(dump.contains("allocated base=0x0000000000001000"));
    assert!(dump.contains("heap      start=0x0000000000001100"));
}

#[test]
fn flush_tlb_forces_misses() {
    let mut memory = memory_with_static(0x1000, 0x100);
    let _ = memory.translate(0x1000).unwrap();
    memory.flush_tlb();
    assert!(memory.tlb().is_empty());
    let _ = memory.translate(0x1000).unwrap();
    assert_eq!(memory.stats().tlb_misses, 2);
    assert_eq!(memory.stats().pages_assigned, 1);
}

#[test]
fn line_maintenance_is_accepted_locally() {
    let mut memory = memory_with_static(0x1000, 0x100);
    assert!(memory.flush_line(0, 0x1000).unwrap());
    assert!(memory.clean_line(0, 0x1040).unwrap());
    assert!(memory.invalidate_line(0, 0x1080).unwrap());
    assert!(memory.fence(0));
    assert!(memory.flush_line(0, 0x4000).is_err());
}
