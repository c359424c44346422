//! ---
//! ptf_section: "02-identity-derivation"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Deterministic case identities and derived values."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Deterministic case tags.
//!
//! A [`Tag`] is a `(seed, index)` pair handed to cases that need a stable but
//! unique value of their own: database keys, queue names, TCP ports. Every
//! projection is a pure function of the pair, so the same case sees the same
//! values on every run while parallel cases never collide.

pub mod injection;
pub mod ports;
pub mod tag;

pub use injection::{inject_tag, ConstructorArg};
pub use ports::{PortRegistry, MAX_TCP_PORT, MIN_TCP_PORT};
pub use tag::Tag;
