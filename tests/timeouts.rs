// tests/timeouts.rs
//
// Per-test deadlines and the global run deadline.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::init_tracing;
use tokio::sync::mpsc;
use tokio::time::timeout;

use skytest::cluster::{ClusterGroup, InstanceState, ShellClusterBackend};
use skytest::config::ExecutionConfig;
use skytest::engine::{CoreEngine, OperationEvent, Runtime, RuntimeOptions};
use skytest::exec::{ExecutionManager, ShellTestExecutor};
use skytest::model::{FailCause, RunVerdict, TestStatus};
use skytest_test_utils::{ExecutionConfigBuilder, ProviderConfigBuilder};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn build_runtime(
    root: &Path,
    execution: ExecutionConfig,
    global_timeout: Duration,
) -> Runtime<ShellTestExecutor> {
    let manager = Arc::new(ExecutionManager::new(root));
    let provider = Arc::new(ProviderConfigBuilder::new("provider").build());
    let backend = Arc::new(ShellClusterBackend::new(
        Arc::clone(&provider),
        Arc::clone(&manager),
    ));
    let group = ClusterGroup::new(0, provider, backend, 1, root.to_path_buf());

    let execution = Arc::new(execution);
    let tasks = execution
        .tests
        .iter()
        .map(|name| skytest::model::TestEntry::new(0, &execution.name, name.clone()))
        .collect();

    let core = CoreEngine::new(vec![execution], tasks, vec![group]);
    let (ops_tx, ops_rx) = mpsc::channel::<OperationEvent>(16);
    let (_term_tx, term_rx) = mpsc::channel::<String>(2);
    let executor = ShellTestExecutor::new(ops_tx.clone(), manager);
    let options = RuntimeOptions {
        global_timeout,
        stats_interval: None,
        liveness_interval: Duration::from_secs(30),
    };

    Runtime::new(core, options, ops_rx, ops_tx, term_rx, executor)
}

#[tokio::test]
async fn slow_test_times_out_and_instance_is_destroyed() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;

    let runtime = build_runtime(
        tmp.path(),
        ExecutionConfigBuilder::new("slow")
            .timeout(1)
            .test("TestSleeps")
            .run("sleep 10")
            .build(),
        Duration::from_secs(60),
    );

    let core = timeout(Duration::from_secs(30), runtime.run()).await??;

    assert_eq!(core.tasks()[0].status, TestStatus::Timeout);
    assert_eq!(core.tasks()[0].cause, Some(FailCause::TestTimeout));
    assert_eq!(core.tasks()[0].attempts, 1);
    // No rerun with retries = 0, and the hosting instance is not reused.
    assert_eq!(
        core.instance_state("provider-1"),
        Some(InstanceState::Destroyed)
    );
    assert_eq!(core.verdict(), RunVerdict::Failed);

    Ok(())
}

#[tokio::test]
async fn global_deadline_times_out_in_flight_work() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;

    let runtime = build_runtime(
        tmp.path(),
        ExecutionConfigBuilder::new("slow")
            .timeout(600)
            .test("TestSleeps")
            .run("sleep 60")
            .build(),
        Duration::from_secs(2),
    );

    let started = Instant::now();
    let core = timeout(Duration::from_secs(30), runtime.run()).await??;
    let elapsed = started.elapsed();

    // The engine exits within a small epsilon of the global deadline.
    assert!(
        elapsed < Duration::from_secs(10),
        "engine took {elapsed:?} to wind down"
    );
    assert_eq!(core.tasks()[0].status, TestStatus::Timeout);
    assert_eq!(core.tasks()[0].cause, Some(FailCause::GlobalTimeout));
    assert_eq!(core.completed(), &[0]);
    assert_eq!(core.verdict(), RunVerdict::GlobalTimeout);
    assert_eq!(core.verdict().exit_code(), 4);

    Ok(())
}
