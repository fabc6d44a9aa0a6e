//! Fault Injector Unit Tests.

use std::rc::Rc;

use hartsim_core::config::{FaultConfig, FaultKind};
use hartsim_core::core::Executor;
use hartsim_core::core::fault::{FaultInjector, FaultSite};
use hartsim_core::sim::{ProgramSet, ScriptedExecutor};

use crate::common::harness::{ExitAfter, MEM_SIZE, local_memory};

fn faults(kinds: Vec<FaultKind>, width: u32) -> FaultConfig {
    FaultConfig {
        enabled: true,
        kinds,
        width,
        ..FaultConfig::default()
    }
}

#[test]
fn disabled_config_builds_no_injector() {
    assert!(FaultInjector::from_config(&FaultConfig::default()).is_none());
    let mut config = faults(vec![FaultKind::Mem], 1);
    config.enabled = false;
    assert!(FaultInjector::from_config(&config).is_none());
    assert!(FaultInjector::from_config(&faults(Vec::new(), 1)).is_none());
}

#[test]
fn memory_fault_sets_single_bit() {
    let mut memory = local_memory();
    let mut injector = FaultInjector::from_config(&faults(vec![FaultKind::Mem], 1)).unwrap();
    let site = injector.inject(&mut memory, &mut []).unwrap();
    let FaultSite::Memory { offset, mask } = site else {
        panic!("expected a memory fault, got {site:?}");
    };
    assert_eq!(mask, 1);
    assert!(offset <= MEM_SIZE - 8);
    assert_eq!(memory.stats().faults_injected, 1);
}

#[test]
fn mask_fits_configured_width() {
    let mut memory = local_memory();
    let mut injector = FaultInjector::from_config(&faults(vec![FaultKind::Mem], 8)).unwrap();
    for _ in 0..32 {
        if let FaultSite::Memory { mask, .. } = injector.inject(&mut memory, &mut []).unwrap() {
            assert!(mask != 0 && mask <= 0xFF, "mask {mask:#x}");
        }
    }
}

#[test]
fn same_seed_same_faults() {
    let config = faults(vec![FaultKind::Mem], 16);
    let mut a = FaultInjector::from_config(&config).unwrap();
    let mut b = FaultInjector::from_config(&config).unwrap();
    let mut mem_a = local_memory();
    let mut mem_b = local_memory();
    for _ in 0..8 {
        assert_eq!(
            a.inject(&mut mem_a, &mut []).unwrap(),
            b.inject(&mut mem_b, &mut []).unwrap()
        );
    }
}

#[test]
fn core_fault_goes_to_an_executor() {
    let mut memory = local_memory();
    let programs = Rc::new(ProgramSet::default());
    let mut executors = ScriptedExecutor::for_cores(2, &programs);
    let mut injector = FaultInjector::from_config(&faults(vec![FaultKind::Decode], 1)).unwrap();
    let site = injector.inject(&mut memory, &mut executors).unwrap();
    assert!(matches!(
        site,
        FaultSite::Core {
            kind: FaultKind::Decode,
            mask: 1,
            ..
        }
    ));
    let total: u64 = executors.iter_mut().map(|e| e.take_stats().faults_injected).sum();
    assert_eq!(total, 1);
}

#[test]
fn executor_without_fault_support_drops_it() {
    let mut memory = local_memory();
    let mut executors: Vec<Box<dyn Executor>> = ExitAfter::boxed(1, 1);
    let mut injector = FaultInjector::from_config(&faults(vec![FaultKind::Reg], 1)).unwrap();
    assert_eq!(injector.inject(&mut memory, &mut executors).unwrap(), FaultSite::Dropped);
}

#[test]
fn periodic_schedule() {
    let mut config = faults(vec![FaultKind::Mem], 1);
    config.interval = Some(3);
    let injector = FaultInjector::from_config(&config).unwrap();
    let due: Vec<u64> = (0..10).filter(|&c| injector.due(c)).collect();
    assert_eq!(due, vec![3, 6, 9]);

    let once = FaultInjector::from_config(&faults(vec![FaultKind::Mem], 1)).unwrap();
    assert!((0..10).all(|c| !once.due(c)));
}

#[test]
fn all_kinds_spread_over_memory_and_cores() {
    let mut memory = local_memory();
    let programs = Rc::new(ProgramSet::default());
    let mut executors = ScriptedExecutor::for_cores(2, &programs);
    let mut injector = FaultInjector::from_config(&faults(vec![FaultKind::All], 4)).unwrap();
    let mut memory_hits = 0;
    let mut core_hits = 0;
    for _ in 0..64 {
        match injector.inject(&mut memory, &mut executors).unwrap() {
            FaultSite::Memory { .. } => memory_hits += 1,
            FaultSite::Core { kind, .. } => {
                assert_ne!(kind, FaultKind::Mem);
                core_hits += 1;
            }
            FaultSite::Dropped => {}
        }
    }
    assert!(memory_hits > 0 && core_hits > 0, "{memory_hits} / {core_hits}");
    assert_eq!(memory.stats().faults_injected, memory_hits);
}
