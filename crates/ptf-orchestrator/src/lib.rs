//! ---
//! ptf_section: "05-orchestration"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Case orchestrator exports."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Parallel case orchestration.
//!
//! [`ParallelSettings`] resolves how many cases of a scope may run at once and
//! hands out shared [`ptf_rt::Limiter`]s. [`Orchestrator`] decides per method
//! whether its cases run in parallel or sequentially, injects each case's
//! [`ptf_tag::Tag`], writes diagnostic lines and folds results into a
//! [`RunSummary`].

pub mod aggregator;
pub mod case;
pub mod identity;
pub mod orchestrator;
pub mod settings;

pub use aggregator::ExceptionAggregator;
pub use case::{
    CaseError, ClassMetadata, MethodGroup, MethodMetadata, RunResult, RunStatus, RunSummary,
    TestCase,
};
pub use identity::normalize_assembly_name;
pub use orchestrator::{
    decide_mode, CaseOrderer, ClassCase, ClassRun, InputOrder, Orchestrator, RunMode, RunState,
    DEFAULT_WATCHDOG_THRESHOLD,
};
pub use settings::{
    AssemblyMetadata, AssemblyOptions, ExecutionScope, ParallelSettings, ResolvedScope, ScopeKey,
};
