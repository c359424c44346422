//! ---
//! ptf_section: "09-testing-qa"
//! ptf_subsection: "integration-tests"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Configuration-to-summary runs across every crate."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use ptf_common::{FrameworkConfig, ScopeSettings};
use ptf_logging::{BufferedSink, DiagnosticSink, MemorySink};
use ptf_orchestrator::{
    AssemblyMetadata, AssemblyOptions, CaseError, ExecutionScope, MethodGroup, Orchestrator,
    ParallelSettings, RunResult, TestCase,
};
use ptf_sim::{SimulatedCancellation, SimulatedTime};
use ptf_tag::ConstructorArg;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
[execution]
watchdog_threshold_secs = 60
host_degree = 3
default_retry_attempts = 2

[assemblies."Billing.Tests, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"]
degree = 2
"#;

const ASSEMBLY: &str = "Billing.Tests, Version=1.0.0.0, Culture=neutral, PublicKeyToken=abc123";

/// Advances its own simulated clock in ten-second steps against a
/// thirty-second deadline.
struct DeadlineCase {
    id: &'static str,
    steps: u32,
}

#[async_trait]
impl TestCase for DeadlineCase {
    fn unique_id(&self) -> &str {
        self.id
    }

    fn display_name(&self) -> &str {
        self.id
    }

    async fn run(
        &self,
        args: &[ConstructorArg],
        _cancel: CancellationToken,
    ) -> Result<RunResult, CaseError> {
        let tag = args
            .iter()
            .find_map(ConstructorArg::as_tag)
            .ok_or_else(|| anyhow!("no tag injected"))?
            .clone();
        let deadline = SimulatedCancellation::new(Duration::from_secs(30), &tag);
        for _ in 0..self.steps {
            tag.simulate_delay(Duration::from_secs(10));
            if deadline.is_cancelled() {
                return Err(CaseError::Cancelled);
            }
            tokio::task::yield_now().await;
        }
        Ok(RunResult::passed(Duration::from_millis(5)))
    }
}

struct BrokenCase;

#[async_trait]
impl TestCase for BrokenCase {
    fn unique_id(&self) -> &str {
        "broken"
    }

    fn display_name(&self) -> &str {
        "Billing.Invoices.broken"
    }

    async fn run(
        &self,
        _args: &[ConstructorArg],
        _cancel: CancellationToken,
    ) -> Result<RunResult, CaseError> {
        Err(anyhow!("ledger offline").into())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn configured_run_reports_through_a_buffered_sink() {
    let config = FrameworkConfig::from_str(CONFIG).expect("config parses");
    let settings = Arc::new(ParallelSettings::from_config(&config));
    assert_eq!(settings.host_degree(), 3);

    let options = settings
        .register_assembly(
            &AssemblyMetadata::new(ASSEMBLY, ScopeSettings::default()),
            AssemblyOptions::default(),
        )
        .expect("register");
    assert!(!options.disable_parallelization);
    assert_eq!(
        settings.assembly_settings(ASSEMBLY).expect("registered").degree,
        Some(2)
    );

    let memory = Arc::new(MemorySink::new());
    let buffered = Arc::new(BufferedSink::new(memory.clone() as Arc<dyn DiagnosticSink>));
    let orchestrator = Orchestrator::new(
        settings.clone(),
        buffered.clone() as Arc<dyn DiagnosticSink>,
        CancellationToken::new(),
    )
    .with_execution_config(&config.execution);

    let cases: Vec<Arc<dyn TestCase>> = vec![
        Arc::new(DeadlineCase {
            id: "Billing.Invoices.quick",
            steps: 2,
        }),
        Arc::new(DeadlineCase {
            id: "Billing.Invoices.timeout",
            steps: 5,
        }),
        Arc::new(BrokenCase),
    ];
    let group = MethodGroup::new(ExecutionScope::new(ASSEMBLY, "Billing.Invoices", "Settle"), cases);

    let summary = orchestrator
        .run_group(&group, &[ConstructorArg::tag_slot()])
        .await
        .expect("group runs");

    assert_eq!(summary.total, 2, "the timed-out case is excluded");
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.passed(), 1);
    assert!(memory.messages().is_empty(), "nothing forwarded before flush");
    assert!(buffered.pending() > 0);

    buffered.flush();
    assert_eq!(memory.with_prefix("STARTED: ").len(), 3);
    assert_eq!(
        memory.with_prefix("SUCCESS: "),
        vec!["SUCCESS: Billing.Invoices.quick (0.005s)"]
    );
    assert_eq!(memory.with_prefix("RETRY: Billing.Invoices.broken").len(), 1);
    assert_eq!(
        memory.with_prefix("ERROR: "),
        vec!["ERROR: Billing.Invoices.broken (ledger offline)"]
    );
    assert_eq!(orchestrator.aggregator().take().len(), 1);
    assert_eq!(settings.limiter_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disabled_assembly_runs_in_discovery_order() {
    let config = FrameworkConfig::from_str(
        r#"
[assemblies."Serial.Tests"]
enabled = false
"#,
    )
    .expect("config parses");
    let settings = Arc::new(ParallelSettings::from_config(&config));
    let options = settings
        .register_assembly(
            &AssemblyMetadata::new("Serial.Tests", ScopeSettings::default()),
            AssemblyOptions::default(),
        )
        .expect("register");
    assert!(options.disable_parallelization);
    assert!(!options.parallelize_collections);

    let memory = Arc::new(MemorySink::new());
    let orchestrator = Orchestrator::new(
        settings,
        memory.clone() as Arc<dyn DiagnosticSink>,
        CancellationToken::new(),
    );
    let cases: Vec<Arc<dyn TestCase>> = ["Serial.a", "Serial.b", "Serial.c"]
        .into_iter()
        .map(|id| Arc::new(DeadlineCase { id, steps: 1 }) as Arc<dyn TestCase>)
        .collect();
    let group = MethodGroup::new(ExecutionScope::new("Serial.Tests", "Serial", "Ordered"), cases);

    let summary = orchestrator
        .run_group(&group, &[ConstructorArg::tag_slot()])
        .await
        .expect("group runs");

    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 0);
    let lines: Vec<String> = memory
        .messages()
        .into_iter()
        .filter(|line| !line.starts_with("WARNING"))
        .collect();
    assert_eq!(
        lines,
        vec![
            "STARTED: Serial.a",
            "SUCCESS: Serial.a (0.005s)",
            "STARTED: Serial.b",
            "SUCCESS: Serial.b (0.005s)",
            "STARTED: Serial.c",
            "SUCCESS: Serial.c (0.005s)",
        ]
    );
}
