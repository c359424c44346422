//! ---
//! ptf_section: "09-testing-qa"
//! ptf_subsection: "integration-tests"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Process-wide port reservation over the full range."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
//! Runs as its own binary: it consumes every port of the process-wide
//! registry.
use ptf_common::FrameworkError;
use ptf_tag::{Tag, MAX_TCP_PORT, MIN_TCP_PORT};

#[test]
fn global_registry_is_a_bijection_onto_the_port_range() {
    let mut previous = None;
    for expected in MIN_TCP_PORT..=MAX_TCP_PORT {
        let tag = Tag::from_seed(format!("PORT:{expected}")).expect("seed");
        let port = tag.reserve_tcp_port().expect("port available");
        assert_eq!(port, expected);
        if let Some(previous) = previous {
            assert!(port > previous);
        }
        previous = Some(port);
    }

    let err = Tag::from_seed("PORT:65536")
        .expect("seed")
        .reserve_tcp_port()
        .expect_err("range exhausted");
    assert!(matches!(err, FrameworkError::Capacity(_)));
    assert!(err.to_string().contains("65535"), "{err}");
}
