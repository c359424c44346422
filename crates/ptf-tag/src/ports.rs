//! ---
//! ptf_section: "02-identity-derivation"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Deterministic case identities and derived values."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
//! TCP port reservation keyed by tag.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ptf_common::{FrameworkError, Result};
use tracing::{debug, warn};

use crate::tag::Tag;

/// First port handed out; everything below is privileged.
pub const MIN_TCP_PORT: u16 = 1024;
/// Last port handed out.
pub const MAX_TCP_PORT: u16 = 65535;

static GLOBAL: Lazy<PortRegistry> = Lazy::new(PortRegistry::new);

/// Process-wide registry used by [`Tag::reserve_tcp_port`].
pub fn global() -> &'static PortRegistry {
    &GLOBAL
}

#[derive(Debug)]
struct PortState {
    /// Keyed by seed text and index so reservations never keep a tag alive.
    assigned: HashMap<(Box<str>, i32), u16>,
    next: u32,
}

/// Assigns ports in `[MIN_TCP_PORT, MAX_TCP_PORT]` to tags in request order.
///
/// Each distinct tag receives the next unused port; asking again for the same
/// tag returns its existing port. Once the range is used up every request for
/// a new tag fails.
#[derive(Debug)]
pub struct PortRegistry {
    state: Mutex<PortState>,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortRegistry {
    /// Empty registry starting at [`MIN_TCP_PORT`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PortState {
                assigned: HashMap::new(),
                next: u32::from(MIN_TCP_PORT),
            }),
        }
    }

    /// Port for `tag`, allocating the next free one on first request.
    pub fn reserve(&self, tag: &Tag) -> Result<u16> {
        let key = (Box::from(tag.seed()), tag.index());
        let mut state = self.state.lock();
        if let Some(port) = state.assigned.get(&key) {
            return Ok(*port);
        }
        let port = u16::try_from(state.next).map_err(|_| {
            warn!(tag = %tag, "tcp port range exhausted");
            FrameworkError::Capacity(format!(
                "Maximum number of ports are captured: {MAX_TCP_PORT}"
            ))
        })?;
        state.next += 1;
        state.assigned.insert(key, port);
        debug!(tag = %tag, port, "tcp port reserved");
        Ok(port)
    }

    /// Number of ports handed out so far.
    pub fn reserved(&self) -> usize {
        self.state.lock().assigned.len()
    }

    /// Forget every reservation and restart at [`MIN_TCP_PORT`].
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.assigned.clear();
        state.next = u32::from(MIN_TCP_PORT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_are_assigned_in_request_order() {
        let registry = PortRegistry::new();
        let a = Tag::from_seed("a").expect("seed");
        let b = Tag::from_seed("b").expect("seed");
        assert_eq!(registry.reserve(&a).expect("port"), 1024);
        assert_eq!(registry.reserve(&b).expect("port"), 1025);
        assert_eq!(registry.reserve(&a.next_one()).expect("port"), 1026);
        assert_eq!(registry.reserved(), 3);
    }

    #[test]
    fn repeated_request_returns_same_port() {
        let registry = PortRegistry::new();
        let a = Tag::from_seed("a").expect("seed");
        let first = a.reserve_tcp_port_in(&registry).expect("port");
        assert_eq!(a.reserve_tcp_port_in(&registry).expect("port"), first);
        assert_eq!(registry.reserved(), 1);
    }

    #[test]
    fn reservations_do_not_hold_the_tag() {
        let registry = PortRegistry::new();
        let a = Tag::from_seed("port-holder").expect("seed");
        let port = registry.reserve(&a).expect("port");
        assert_eq!(a.share_count(), 1);
        drop(a);
        let again = Tag::from_seed("port-holder").expect("seed");
        assert_eq!(registry.reserve(&again).expect("port"), port);
    }

    #[test]
    fn reset_restarts_the_range() {
        let registry = PortRegistry::new();
        let a = Tag::from_seed("a").expect("seed");
        registry.reserve(&a).expect("port");
        registry.reset();
        assert_eq!(registry.reserved(), 0);
        let b = Tag::from_seed("b").expect("seed");
        assert_eq!(registry.reserve(&b).expect("port"), MIN_TCP_PORT);
    }
}
