//! ---
//! ptf_section: "01-core-functionality"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Shared primitives and utilities for the core runtime."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
//! Core shared primitives for the parallel test framework workspace.
//! This crate exposes the error taxonomy, configuration loading, tracing
//! setup, and duration helpers consumed across the workspace.

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::{ExecutionConfig, FrameworkConfig, LoggingConfig, ScopeSettings};
pub use error::{FrameworkError, Result};
pub use logging::{init_tracing, LogFormat};
