//! ---
//! ptf_section: "04-simulation"
//! ptf_subsection: "01-bootstrap"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Simulated clock module exports and shared types."
//! ptf_version: "v0.1.0"
//! ptf_owner: "tbd"
//! ---
//! Manually advanced clocks keyed by [`ptf_tag::Tag`].
//!
//! Cases that exercise timeout logic advance their own virtual clock instead
//! of sleeping. Watchers registered against a threshold fire synchronously on
//! the advancing thread the first time the clock reaches it, which makes
//! time-based cancellation fully deterministic.

pub mod cancellation;
pub mod clock;

pub use cancellation::{SimulatedCancellation, SimulatedTime};
pub use clock::{global, global_handle, ClockRegistry, ConsumerId, SimulatedClock};
