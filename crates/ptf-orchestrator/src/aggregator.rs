//! ---
//! ptf_section: "05-orchestration"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Collected case failures for the host."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use parking_lot::Mutex;
use ptf_common::FrameworkError;

/// Failures recorded during a run, in the order they were observed.
#[derive(Debug, Default)]
pub struct ExceptionAggregator {
    errors: Mutex<Vec<FrameworkError>>,
}

impl ExceptionAggregator {
    /// Empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn add(&self, error: FrameworkError) {
        self.errors.lock().push(error);
    }

    /// Whether anything has been recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    /// Snapshot of recorded failures.
    pub fn errors(&self) -> Vec<FrameworkError> {
        self.errors.lock().clone()
    }

    /// Drain recorded failures.
    pub fn take(&self) -> Vec<FrameworkError> {
        std::mem::take(&mut *self.errors.lock())
    }
}
