//! ---
//! ptf_section: "02-identity-derivation"
//! ptf_subsection: "tests"
//! ptf_type: "test"
//! ptf_scope: "code"
//! ptf_description: "Port registry range and exhaustion behaviour."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use ptf_common::FrameworkError;
use ptf_tag::{PortRegistry, Tag, MAX_TCP_PORT, MIN_TCP_PORT};

#[test]
fn registry_enumerates_the_full_range_then_fails() {
    let registry = PortRegistry::new();
    let mut ports = Vec::with_capacity(usize::from(MAX_TCP_PORT - MIN_TCP_PORT) + 1);
    for port in MIN_TCP_PORT..=MAX_TCP_PORT {
        let tag = Tag::from_seed(format!("PORT:{port}")).expect("seed");
        ports.push(tag.reserve_tcp_port_in(&registry).expect("port available"));
    }
    assert!(ports.iter().copied().eq(MIN_TCP_PORT..=MAX_TCP_PORT));

    let overflow = Tag::from_seed(format!("PORT:{}", u32::from(MAX_TCP_PORT) + 1)).expect("seed");
    let err = overflow
        .reserve_tcp_port_in(&registry)
        .expect_err("range exhausted");
    assert!(matches!(err, FrameworkError::Capacity(_)));
    assert_eq!(err.to_string(), "Maximum number of ports are captured: 65535");

    // Tags that already hold a port keep it after exhaustion.
    let first = Tag::from_seed(format!("PORT:{MIN_TCP_PORT}")).expect("seed");
    assert_eq!(first.reserve_tcp_port_in(&registry).expect("existing port"), MIN_TCP_PORT);
}
