//! ---
//! ptf_section: "03-diagnostics-logging"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Structured logging adapters and diagnostic sinks."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Case-aware logging helpers and the free-text diagnostic channel consumed
//! by the orchestrator.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;
pub mod sink;

pub use sink::{BufferedSink, DiagnosticSink, MemorySink, TracingSink};

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Assembly (test binary) the case belongs to.
    pub assembly: Option<&'a str>,
    /// Class grouping the method.
    pub class: Option<&'a str>,
    /// Method the case instantiates.
    pub method: Option<&'a str>,
    /// Unique identifier of the case.
    pub case: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an assembly name.
    pub fn with_assembly(mut self, assembly: &'a str) -> Self {
        self.assembly = Some(assembly);
        self
    }

    /// Attach a class name.
    pub fn with_class(mut self, class: &'a str) -> Self {
        self.class = Some(class);
        self
    }

    /// Attach a method name.
    pub fn with_method(mut self, method: &'a str) -> Self {
        self.method = Some(method);
        self
    }

    /// Attach a case identifier.
    pub fn with_case(mut self, case: &'a str) -> Self {
        self.case = Some(case);
        self
    }
}

/// High-level outcome used when emitting case lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseEventOutcome {
    /// The case passed or the step completed.
    Success,
    /// The case was skipped or did not run.
    Skipped,
    /// The case failed or the step was aborted.
    Fault,
}

impl CaseEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CaseEventOutcome::Success => "success",
            CaseEventOutcome::Skipped => "skipped",
            CaseEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized case event with an outcome.
pub fn log_case_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: CaseEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    let fields = (
        ctx.assembly.unwrap_or(""),
        ctx.class.unwrap_or(""),
        ctx.method.unwrap_or(""),
        ctx.case.unwrap_or(""),
    );
    // `tracing::event!` needs a constant level.
    match outcome {
        CaseEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            assembly = fields.0,
            class = fields.1,
            method = fields.2,
            case = fields.3,
            message = %message
        ),
        _ => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            assembly = fields.0,
            class = fields.1,
            method = fields.2,
            case = fields.3,
            message = %message
        ),
    }
}
