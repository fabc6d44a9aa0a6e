//! Memory Builder Unit Tests.

use hartsim_core::common::{ConfigError, SimError};
use hartsim_core::config::BackendKind;
use hartsim_core::soc::build_memory;
use hartsim_core::soc::memory::remote::{LoopbackLink, NodeId};
use rstest::rstest;

use crate::common::harness::{MEM_SIZE, config_with, init_tracing};

#[rstest]
#[case::local(BackendKind::Local, "local")]
#[case::controller(BackendKind::Controller, "controller")]
fn backend_is_chosen_from_config(#[case] kind: BackendKind, #[case] name: &str) {
    init_tracing();
    let memory = build_memory(&config_with(kind, 1, 1), None).unwrap();
    assert_eq!(memory.backend_name(), name);
    assert_eq!(memory.mem_size(), MEM_SIZE);
    assert_eq!(memory.node(), None);
}

#[test]
fn remote_backend_uses_the_link() {
    let mut config = config_with(BackendKind::Remote, 1, 1);
    config.node.zone = 2;
    config.node.precinct = 7;
    let link = LoopbackLink::new(MEM_SIZE).unwrap();
    let memory = build_memory(&config, Some(Box::new(link))).unwrap();
    assert_eq!(memory.backend_name(), "remote");
    assert_eq!(memory.node(), Some(NodeId { zone: 2, precinct: 7 }));
}

#[test]
fn remote_backend_without_link_is_rejected() {
    let err = build_memory(&config_with(BackendKind::Remote, 1, 1), None).unwrap_err();
    assert!(matches!(err, SimError::Config(ConfigError::Invalid(_))), "{err}");
}

#[test]
fn stack_top_leaves_room_for_program_header() {
    let memory = build_memory(&config_with(BackendKind::Local, 1, 1), None).unwrap();
    assert_eq!(memory.stack_top(), MEM_SIZE - 1024);
}
