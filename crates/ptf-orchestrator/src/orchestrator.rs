//! ---
//! ptf_section: "05-orchestration"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Method and class runners deciding parallel or sequential execution."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::future::join_all;
use futures::FutureExt;
use indexmap::IndexMap;
use ptf_common::time::{duration_to_micros, format_elapsed, minutes_rounded};
use ptf_common::{ExecutionConfig, FrameworkError, Result};
use ptf_logging::{
    log_case_event, ptf_debug, ptf_error, ptf_info, ptf_warn, CaseEventOutcome, DiagnosticSink,
    LogContext,
};
use ptf_rt::{panic_message, HostExecutor, Limiter};
use ptf_sim::ClockRegistry;
use ptf_tag::{inject_tag, ConstructorArg};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregator::ExceptionAggregator;
use crate::case::{
    CaseError, ClassMetadata, MethodGroup, MethodMetadata, RunResult, RunStatus, RunSummary,
    TestCase,
};
use crate::settings::{AssemblyOptions, ExecutionScope, ParallelSettings};

/// Default elapsed time after which a running case is reported once.
pub const DEFAULT_WATCHDOG_THRESHOLD: Duration = Duration::from_secs(120);

/// Lifecycle of one [`Orchestrator::run_group`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Group accepted.
    Init,
    /// Choosing between parallel and sequential execution.
    DecideMode,
    /// Cases launched concurrently.
    RunParallel,
    /// Cases launched one at a time.
    RunSequential,
    /// Results being summed.
    Aggregate,
    /// Summary returned.
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Init => "init",
            RunState::DecideMode => "decide-mode",
            RunState::RunParallel => "run-parallel",
            RunState::RunSequential => "run-sequential",
            RunState::Aggregate => "aggregate",
            RunState::Done => "done",
        };
        f.write_str(label)
    }
}

/// Execution mode chosen for a method group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Every case starts without waiting for the others.
    Parallel,
    /// Cases run one after another in discovery order.
    Sequential {
        /// First condition that forced sequential execution.
        reason: &'static str,
    },
}

/// Choose the execution mode of `group` under the assembly's options.
pub fn decide_mode(options: &AssemblyOptions, group: &MethodGroup) -> RunMode {
    let class = &group.class;
    let method = &group.method;
    let reason = if options.disable_parallelization {
        "assembly disables parallelization"
    } else if class.settings.is_disabled() {
        "class disables parallelization"
    } else if class.in_collection && !class.settings.is_enabled_override() {
        "class belongs to a collection"
    } else if method.settings.is_disabled() {
        "method disables parallelization"
    } else if method.non_enumerable_data {
        "data source is not pre-enumerable"
    } else if !options.pre_enumerate_cases {
        "cases were not pre-enumerated"
    } else {
        return RunMode::Parallel;
    };
    RunMode::Sequential { reason }
}

/// Decides the order in which a class's cases run.
pub trait CaseOrderer: Send + Sync {
    /// Return a permutation of `0..cases.len()`.
    fn order(&self, cases: &[ClassCase]) -> anyhow::Result<Vec<usize>>;
}

/// Keeps discovery order.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputOrder;

impl CaseOrderer for InputOrder {
    fn order(&self, cases: &[ClassCase]) -> anyhow::Result<Vec<usize>> {
        Ok((0..cases.len()).collect())
    }
}

/// One case of a class together with its method.
#[derive(Clone)]
pub struct ClassCase {
    /// Method the case belongs to.
    pub method: String,
    /// Metadata of that method.
    pub metadata: MethodMetadata,
    /// The case itself.
    pub case: Arc<dyn TestCase>,
}

impl fmt::Debug for ClassCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassCase")
            .field("method", &self.method)
            .field("case", &self.case.display_name())
            .finish()
    }
}

/// All cases of one class, as handed to [`Orchestrator::run_class`].
#[derive(Debug, Clone)]
pub struct ClassRun {
    /// Owning assembly.
    pub assembly: String,
    /// Fully qualified class name.
    pub class: String,
    /// Class metadata.
    pub metadata: ClassMetadata,
    /// Cases in discovery order.
    pub cases: Vec<ClassCase>,
}

/// Runs method groups and classes against a shared settings resolver.
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<ParallelSettings>,
    sink: Arc<dyn DiagnosticSink>,
    aggregator: Arc<ExceptionAggregator>,
    cancel: CancellationToken,
    watchdog_threshold: Duration,
    default_retry_attempts: u32,
    clocks: Arc<ClockRegistry>,
}

impl Orchestrator {
    /// Orchestrator reporting to `sink` and observing `cancel`.
    pub fn new(
        settings: Arc<ParallelSettings>,
        sink: Arc<dyn DiagnosticSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            sink,
            aggregator: Arc::new(ExceptionAggregator::new()),
            cancel,
            watchdog_threshold: DEFAULT_WATCHDOG_THRESHOLD,
            default_retry_attempts: 1,
            clocks: ptf_sim::global_handle(),
        }
    }

    /// Apply watchdog and retry defaults from configuration.
    pub fn with_execution_config(mut self, config: &ExecutionConfig) -> Self {
        self.watchdog_threshold = config.watchdog_threshold;
        self.default_retry_attempts = config.default_retry_attempts.max(1);
        self
    }

    /// Sweep `clocks` after each group instead of the process-wide registry.
    pub fn with_clock_registry(mut self, clocks: Arc<ClockRegistry>) -> Self {
        self.clocks = clocks;
        self
    }

    /// Override the watchdog threshold.
    pub fn with_watchdog_threshold(mut self, threshold: Duration) -> Self {
        self.watchdog_threshold = threshold;
        self
    }

    /// Failures recorded for the host.
    pub fn aggregator(&self) -> Arc<ExceptionAggregator> {
        self.aggregator.clone()
    }

    /// The run's cancellation signal.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The settings resolver in use.
    pub fn settings(&self) -> &Arc<ParallelSettings> {
        &self.settings
    }

    /// Run every case of one method and return the aggregate.
    ///
    /// Cancelled cases are left out of the summary. Failures escaping a case
    /// are reported to the diagnostic sink, recorded in the aggregator and
    /// counted as failed.
    pub async fn run_group(
        &self,
        group: &MethodGroup,
        constructor_args: &[ConstructorArg],
    ) -> Result<RunSummary> {
        let scope = &group.scope;
        let ctx = LogContext::new()
            .with_assembly(&scope.assembly)
            .with_class(&scope.class)
            .with_method(&scope.method);
        let mut state = RunState::Init;
        transition(scope, &mut state, RunState::DecideMode);

        let options = self.settings.options(&scope.assembly)?;
        let mode = decide_mode(&options, group);
        let runner = CaseRunner {
            sink: self.sink.clone(),
            aggregator: self.aggregator.clone(),
            cancel: self.cancel.clone(),
            watchdog_threshold: self.watchdog_threshold,
            attempts: group
                .method
                .retry_attempts
                .unwrap_or(self.default_retry_attempts)
                .max(1),
            scope: Arc::new(scope.clone()),
        };

        let summary = match mode {
            RunMode::Parallel => {
                let resolved =
                    self.settings
                        .resolve(scope, &group.class.settings, &group.method.settings)?;
                transition(scope, &mut state, RunState::RunParallel);
                ptf_debug!(
                    context = ctx.clone(),
                    "running {} cases in parallel (degree {})",
                    group.cases.len(),
                    resolved.degree
                );
                run_parallel(&runner, &group.cases, constructor_args, resolved.limiter).await
            }
            RunMode::Sequential { reason } => {
                transition(scope, &mut state, RunState::RunSequential);
                ptf_debug!(
                    context = ctx.clone(),
                    "running {} cases sequentially: {}",
                    group.cases.len(),
                    reason
                );
                run_sequential(&runner, &group.cases, constructor_args).await
            }
        };

        transition(scope, &mut state, RunState::Aggregate);
        ptf_info!(
            context = ctx,
            "group finished: total={} failed={} skipped={} time={}",
            summary.total,
            summary.failed,
            summary.skipped,
            format_elapsed(summary.time)
        );
        self.clocks.sweep();
        transition(scope, &mut state, RunState::Done);
        Ok(summary)
    }

    /// Order a class's cases, group them by method and run the groups.
    ///
    /// A failing orderer is reported and the class falls back to input order.
    /// Method groups run concurrently unless the class or its assembly
    /// disables parallelization.
    pub async fn run_class(
        &self,
        class: &ClassRun,
        orderer: &dyn CaseOrderer,
        constructor_args: &[ConstructorArg],
    ) -> Result<RunSummary> {
        let options = self.settings.options(&class.assembly)?;
        let order = self.order_cases(class, orderer);

        let mut groups: IndexMap<&str, MethodGroup> = IndexMap::new();
        for index in order {
            let entry = &class.cases[index];
            groups
                .entry(entry.method.as_str())
                .or_insert_with(|| {
                    MethodGroup::new(
                        ExecutionScope::new(&class.assembly, class.class.clone(), entry.method.clone()),
                        Vec::new(),
                    )
                    .with_class(class.metadata)
                    .with_method(entry.metadata)
                })
                .cases
                .push(entry.case.clone());
        }

        let concurrent_methods =
            !options.disable_parallelization && !class.metadata.settings.is_disabled();
        debug!(
            class = %class.class,
            methods = groups.len(),
            concurrent_methods,
            "running class"
        );

        if concurrent_methods {
            let results = join_all(
                groups
                    .values()
                    .map(|group| self.run_group(group, constructor_args)),
            )
            .await;
            results.into_iter().sum::<Result<RunSummary>>()
        } else {
            let mut summary = RunSummary::default();
            for group in groups.values() {
                if self.cancel.is_cancelled() {
                    break;
                }
                summary += self.run_group(group, constructor_args).await?;
            }
            Ok(summary)
        }
    }

    fn order_cases(&self, class: &ClassRun, orderer: &dyn CaseOrderer) -> Vec<usize> {
        let count = class.cases.len();
        let failure = match std::panic::catch_unwind(AssertUnwindSafe(|| orderer.order(&class.cases)))
        {
            Ok(Ok(order)) if is_permutation(&order, count) => return order,
            Ok(Ok(order)) => format!(
                "orderer returned {} indices that are not a permutation of {count} cases",
                order.len()
            ),
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => format!("orderer panicked: {}", panic_message(payload.as_ref())),
        };
        let ctx = LogContext::new()
            .with_assembly(&class.assembly)
            .with_class(&class.class);
        ptf_warn!(context = ctx, "case ordering failed, using input order: {}", failure);
        self.sink.emit(&format!(
            "ERROR: ordering {} failed ({failure}); running cases in input order",
            class.class
        ));
        (0..count).collect()
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("watchdog_threshold", &self.watchdog_threshold)
            .field("default_retry_attempts", &self.default_retry_attempts)
            .field("clocks", &self.clocks.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn is_permutation(order: &[usize], count: usize) -> bool {
    if order.len() != count {
        return false;
    }
    let mut seen = vec![false; count];
    order.iter().all(|&index| {
        index < count && !std::mem::replace(&mut seen[index], true)
    })
}

fn transition(scope: &ExecutionScope, state: &mut RunState, next: RunState) {
    debug!(scope = %scope, from = %state, to = %next, "run state transition");
    *state = next;
}

async fn run_parallel(
    runner: &CaseRunner,
    cases: &[Arc<dyn TestCase>],
    args: &[ConstructorArg],
    limiter: Option<Arc<Limiter>>,
) -> RunSummary {
    match limiter {
        Some(limiter) => {
            let launches = cases.iter().map(|case| {
                runner
                    .clone()
                    .run_limited(limiter.clone(), case.clone(), args.to_vec())
            });
            join_all(launches)
                .await
                .into_iter()
                .flatten()
                .collect()
        }
        None => {
            let mut executor = HostExecutor::new();
            for case in cases {
                executor.spawn(runner.clone().run(case.clone(), args.to_vec()));
            }
            executor
                .join()
                .await
                .into_iter()
                .zip(cases)
                .filter_map(|(joined, case)| match joined {
                    Ok(outcome) => outcome,
                    Err(err) => Some(runner.record_failure(&**case, &err.to_string(), Duration::ZERO)),
                })
                .collect()
        }
    }
}

async fn run_sequential(
    runner: &CaseRunner,
    cases: &[Arc<dyn TestCase>],
    args: &[ConstructorArg],
) -> RunSummary {
    let mut summary = RunSummary::default();
    for (position, case) in cases.iter().enumerate() {
        if runner.cancel.is_cancelled() {
            debug!(
                scope = %runner.scope,
                remaining = cases.len() - position,
                "cancellation observed, not launching remaining cases"
            );
            break;
        }
        if let Some(result) = runner.clone().run(case.clone(), args.to_vec()).await {
            summary += RunSummary::from(result);
        }
    }
    summary
}

/// Everything a single case execution needs, detached from the orchestrator
/// so it can move onto scheduler workers.
#[derive(Clone)]
struct CaseRunner {
    sink: Arc<dyn DiagnosticSink>,
    aggregator: Arc<ExceptionAggregator>,
    cancel: CancellationToken,
    watchdog_threshold: Duration,
    attempts: u32,
    scope: Arc<ExecutionScope>,
}

impl CaseRunner {
    fn context<'a>(&'a self, case: &'a dyn TestCase) -> LogContext<'a> {
        LogContext::new()
            .with_assembly(&self.scope.assembly)
            .with_class(&self.scope.class)
            .with_method(&self.scope.method)
            .with_case(case.unique_id())
    }

    async fn run_limited(
        self,
        limiter: Arc<Limiter>,
        case: Arc<dyn TestCase>,
        args: Vec<ConstructorArg>,
    ) -> Option<RunResult> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                ptf_debug!(context = self.context(&*case), "cancelled while waiting for a permit");
                return None;
            }
            permit = limiter.acquire() => permit,
        };
        let permit = match permit {
            Ok(permit) => permit,
            Err(err) => {
                return Some(self.record_failure(&*case, &err.to_string(), Duration::ZERO));
            }
        };

        let worker = self.clone();
        let task_case = case.clone();
        let task = limiter.scheduler().enqueue(async move {
            let _permit = permit;
            worker.run(task_case, args).await
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => Some(self.record_failure(&*case, &err.to_string(), Duration::ZERO)),
        }
    }

    async fn run(self, case: Arc<dyn TestCase>, mut args: Vec<ConstructorArg>) -> Option<RunResult> {
        if let Err(err) = inject_tag(&mut args, case.unique_id()) {
            return Some(self.record_failure(&*case, &err.to_string(), Duration::ZERO));
        }

        let name = case.display_name().to_owned();
        self.sink.emit(&format!("STARTED: {name}"));
        ptf_debug!(context = self.context(&*case), "case started");
        let _watchdog = Watchdog::arm(self.sink.clone(), name.clone(), self.watchdog_threshold);
        let started = Instant::now();

        let mut attempt = 1;
        loop {
            let outcome = AssertUnwindSafe(case.run(&args, self.cancel.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(CaseError::Failed(anyhow!(
                        "case panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            let can_retry = attempt < self.attempts && !self.cancel.is_cancelled();

            match outcome {
                Ok(result) if result.status == RunStatus::Failed && can_retry => {
                    self.announce_retry(&name, attempt, "reported failure");
                }
                Ok(result) => {
                    self.sink.emit(&format!(
                        "{}: {name} ({})",
                        result.status.label(),
                        format_elapsed(result.elapsed)
                    ));
                    let outcome = match result.status {
                        RunStatus::Passed => CaseEventOutcome::Success,
                        RunStatus::Failed => CaseEventOutcome::Fault,
                        RunStatus::Skipped | RunStatus::NotRun => CaseEventOutcome::Skipped,
                    };
                    log_case_event(
                        Some(&self.context(&*case)),
                        "case.finished",
                        &format!("{name} finished in {}us", duration_to_micros(result.elapsed)),
                        outcome,
                    );
                    return Some(result);
                }
                Err(CaseError::Cancelled) => {
                    ptf_debug!(
                        context = self.context(&*case),
                        "case cancelled, excluded from the aggregate"
                    );
                    return None;
                }
                Err(CaseError::Failed(err)) if can_retry => {
                    self.announce_retry(&name, attempt, &format!("{err:#}"));
                }
                Err(CaseError::Failed(err)) => {
                    return Some(self.record_failure(&*case, &format!("{err:#}"), started.elapsed()));
                }
            }
            attempt += 1;
        }
    }

    fn announce_retry(&self, name: &str, attempt: u32, reason: &str) {
        warn!(case = %name, attempt, attempts = self.attempts, reason, "retrying case");
        self.sink.emit(&format!(
            "RETRY: {name} attempt {} of {} ({reason})",
            attempt + 1,
            self.attempts
        ));
    }

    fn record_failure(&self, case: &dyn TestCase, message: &str, elapsed: Duration) -> RunResult {
        let name = case.display_name();
        self.sink.emit(&format!("ERROR: {name} ({message})"));
        ptf_error!(context = self.context(case), "case failed: {}", message);
        self.aggregator.add(FrameworkError::execution(name, message));
        RunResult::failed(elapsed)
    }
}

/// One-shot warning for long-running cases. Never cancels; disarmed on drop.
struct Watchdog(JoinHandle<()>);

impl Watchdog {
    fn arm(sink: Arc<dyn DiagnosticSink>, name: String, threshold: Duration) -> Self {
        Watchdog(tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            let minutes = minutes_rounded(threshold);
            warn!(case = %name, minutes, "case exceeded watchdog threshold");
            sink.emit(&format!(
                "WARNING: {name} has been running for more than {minutes} minutes"
            ));
        }))
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptf_common::ScopeSettings;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl TestCase for Named {
        fn unique_id(&self) -> &str {
            self.0
        }

        fn display_name(&self) -> &str {
            self.0
        }

        async fn run(
            &self,
            _args: &[ConstructorArg],
            _cancel: CancellationToken,
        ) -> std::result::Result<RunResult, CaseError> {
            Ok(RunResult::passed(Duration::ZERO))
        }
    }

    fn group() -> MethodGroup {
        MethodGroup::new(
            ExecutionScope::new("A", "C", "m"),
            vec![Arc::new(Named("case")) as Arc<dyn TestCase>],
        )
    }

    #[test]
    fn parallel_only_when_nothing_forbids_it() {
        let options = AssemblyOptions::default();
        assert_eq!(decide_mode(&options, &group()), RunMode::Parallel);

        let disabled = AssemblyOptions {
            disable_parallelization: true,
            ..options
        };
        assert!(matches!(decide_mode(&disabled, &group()), RunMode::Sequential { .. }));

        let not_enumerated = AssemblyOptions {
            pre_enumerate_cases: false,
            ..options
        };
        assert_eq!(
            decide_mode(&not_enumerated, &group()),
            RunMode::Sequential {
                reason: "cases were not pre-enumerated"
            }
        );
    }

    #[test]
    fn class_and_method_flags_force_sequential() {
        let options = AssemblyOptions::default();
        let class_disabled = group().with_class(ClassMetadata {
            settings: ScopeSettings::enabled(false),
            in_collection: false,
        });
        assert!(matches!(decide_mode(&options, &class_disabled), RunMode::Sequential { .. }));

        let collection = group().with_class(ClassMetadata {
            settings: ScopeSettings::default(),
            in_collection: true,
        });
        assert!(matches!(decide_mode(&options, &collection), RunMode::Sequential { .. }));

        let collection_override = group().with_class(ClassMetadata {
            settings: ScopeSettings::enabled(true),
            in_collection: true,
        });
        assert_eq!(decide_mode(&options, &collection_override), RunMode::Parallel);

        let method_disabled = group().with_method(MethodMetadata {
            settings: ScopeSettings::enabled(false),
            ..MethodMetadata::default()
        });
        assert!(matches!(decide_mode(&options, &method_disabled), RunMode::Sequential { .. }));

        let lazy_data = group().with_method(MethodMetadata {
            non_enumerable_data: true,
            ..MethodMetadata::default()
        });
        assert_eq!(
            decide_mode(&options, &lazy_data),
            RunMode::Sequential {
                reason: "data source is not pre-enumerable"
            }
        );
    }

    #[test]
    fn permutation_check() {
        assert!(is_permutation(&[2, 0, 1], 3));
        assert!(is_permutation(&[], 0));
        assert!(!is_permutation(&[0, 0, 1], 3));
        assert!(!is_permutation(&[0, 1], 3));
        assert!(!is_permutation(&[0, 1, 3], 3));
    }

    #[test]
    fn result_sum_stops_at_first_error() {
        let ok: Result<RunSummary> = vec![
            Ok(RunSummary::from(RunResult::passed(Duration::ZERO))),
            Ok(RunSummary::from(RunResult::skipped())),
        ]
        .into_iter()
        .sum();
        assert_eq!(ok.expect("sum").total, 2);

        let err: Result<RunSummary> = vec![
            Ok(RunSummary::default()),
            Err(FrameworkError::configuration("boom")),
        ]
        .into_iter()
        .sum();
        assert!(err.is_err());
    }
}
