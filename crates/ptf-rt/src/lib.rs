//! ---
//! ptf_section: "01-core-functionality"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Runtime helpers supporting the orchestrator."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
//! Bounded scheduling helpers for the case orchestrator.

pub mod executor;
pub mod limiter;
pub mod scheduler;

pub use executor::HostExecutor;
pub use limiter::Limiter;
pub use scheduler::{panic_message, BoundedScheduler, ScheduledTask, SchedulerError, WorkId};
