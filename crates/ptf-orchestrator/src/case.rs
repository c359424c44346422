//! ---
//! ptf_section: "05-orchestration"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Case handles, run results and summaries."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ptf_common::ScopeSettings;
use ptf_tag::ConstructorArg;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::settings::ExecutionScope;

/// Final status of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// The case body completed successfully.
    Passed,
    /// The case body failed.
    Failed,
    /// The case was skipped by its own logic.
    Skipped,
    /// The case was never executed.
    NotRun,
}

impl RunStatus {
    /// Label used on diagnostic status lines.
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Passed => "SUCCESS",
            RunStatus::Failed => "FAILURE",
            RunStatus::Skipped => "SKIPPED",
            RunStatus::NotRun => "NOT RUN",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome reported by a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    /// Final status.
    pub status: RunStatus,
    /// Time spent in the case body.
    pub elapsed: Duration,
}

impl RunResult {
    /// Passed after `elapsed`.
    pub fn passed(elapsed: Duration) -> Self {
        Self {
            status: RunStatus::Passed,
            elapsed,
        }
    }

    /// Failed after `elapsed`.
    pub fn failed(elapsed: Duration) -> Self {
        Self {
            status: RunStatus::Failed,
            elapsed,
        }
    }

    /// Skipped without running.
    pub fn skipped() -> Self {
        Self {
            status: RunStatus::Skipped,
            elapsed: Duration::ZERO,
        }
    }

    /// Never executed.
    pub fn not_run() -> Self {
        Self {
            status: RunStatus::NotRun,
            elapsed: Duration::ZERO,
        }
    }
}

/// Aggregate counters for a batch of cases.
///
/// Merging is a field-wise sum, so the result never depends on the order in
/// which case results arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Cases aggregated.
    pub total: u32,
    /// Cases that failed.
    pub failed: u32,
    /// Cases that were skipped.
    pub skipped: u32,
    /// Cases that never ran.
    pub not_run: u32,
    /// Summed case time.
    pub time: Duration,
}

impl RunSummary {
    /// Field-wise sum of `self` and `other`.
    #[must_use]
    pub fn merged(self, other: RunSummary) -> Self {
        Self {
            total: self.total + other.total,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
            not_run: self.not_run + other.not_run,
            time: self.time + other.time,
        }
    }

    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: RunSummary) {
        *self = self.merged(other);
    }

    /// Cases that passed.
    pub fn passed(&self) -> u32 {
        self.total - self.failed - self.skipped - self.not_run
    }
}

impl From<RunResult> for RunSummary {
    fn from(result: RunResult) -> Self {
        let mut summary = RunSummary {
            total: 1,
            time: result.elapsed,
            ..RunSummary::default()
        };
        match result.status {
            RunStatus::Passed => {}
            RunStatus::Failed => summary.failed = 1,
            RunStatus::Skipped => summary.skipped = 1,
            RunStatus::NotRun => summary.not_run = 1,
        }
        summary
    }
}

impl Add for RunSummary {
    type Output = RunSummary;

    fn add(self, rhs: RunSummary) -> RunSummary {
        self.merged(rhs)
    }
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, rhs: RunSummary) {
        self.merge(rhs);
    }
}

impl Sum for RunSummary {
    fn sum<I: Iterator<Item = RunSummary>>(iter: I) -> Self {
        iter.fold(RunSummary::default(), RunSummary::merged)
    }
}

impl FromIterator<RunResult> for RunSummary {
    fn from_iter<I: IntoIterator<Item = RunResult>>(iter: I) -> Self {
        iter.into_iter().map(RunSummary::from).sum()
    }
}

/// Ways a case can end without a [`RunResult`].
#[derive(Debug, Error)]
pub enum CaseError {
    /// The shared cancellation signal stopped the case; excluded from the aggregate.
    #[error("case cancelled")]
    Cancelled,
    /// The case body failed with an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Opaque unit of work supplied by the host.
#[async_trait]
pub trait TestCase: Send + Sync {
    /// Stable identifier; seeds the case's injected tag.
    fn unique_id(&self) -> &str;

    /// Human-readable name used on diagnostic lines.
    fn display_name(&self) -> &str;

    /// Run the case body with its constructor arguments.
    async fn run(
        &self,
        args: &[ConstructorArg],
        cancel: CancellationToken,
    ) -> Result<RunResult, CaseError>;
}

/// Class-level metadata relevant to scheduling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassMetadata {
    /// Class-level parallelization settings.
    pub settings: ScopeSettings,
    /// The class belongs to a shared collection and runs sequentially unless
    /// it explicitly enables parallelization.
    pub in_collection: bool,
}

/// Method-level metadata relevant to scheduling.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodMetadata {
    /// Method-level parallelization settings.
    pub settings: ScopeSettings,
    /// The method's data source cannot be enumerated ahead of execution.
    pub non_enumerable_data: bool,
    /// Attempts per case; falls back to the configured default.
    pub retry_attempts: Option<u32>,
}

/// All cases of one method, as handed to [`crate::Orchestrator::run_group`].
#[derive(Clone)]
pub struct MethodGroup {
    /// Assembly, class and method identity.
    pub scope: ExecutionScope,
    /// Metadata of the owning class.
    pub class: ClassMetadata,
    /// Metadata of the method.
    pub method: MethodMetadata,
    /// Cases in discovery order.
    pub cases: Vec<Arc<dyn TestCase>>,
}

impl MethodGroup {
    /// Group with default metadata.
    pub fn new(scope: ExecutionScope, cases: Vec<Arc<dyn TestCase>>) -> Self {
        Self {
            scope,
            class: ClassMetadata::default(),
            method: MethodMetadata::default(),
            cases,
        }
    }

    /// Replace the class metadata.
    pub fn with_class(mut self, class: ClassMetadata) -> Self {
        self.class = class;
        self
    }

    /// Replace the method metadata.
    pub fn with_method(mut self, method: MethodMetadata) -> Self {
        self.method = method;
        self
    }
}

impl fmt::Debug for MethodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodGroup")
            .field("scope", &self.scope)
            .field("class", &self.class)
            .field("method", &self.method)
            .field("cases", &self.cases.len())
            .finish()
    }
}
