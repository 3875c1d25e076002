// tests/runtime_fake.rs
//
// Full runtime loop with a fake cluster backend and a fake test executor:
// no processes are spawned, but channels, workers and teardown run for real.

mod common;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::init_tracing;
use tokio::sync::mpsc;
use tokio::time::timeout;

use skytest::cluster::{ClusterBackend, ClusterGroup, InstanceState};
use skytest::config::ExecutionConfig;
use skytest::engine::{CoreEngine, OperationEvent, Runtime, RuntimeOptions};
use skytest::model::{FailCause, RunVerdict, TestEntry, TestOutcome, TestStatus};
use skytest_test_utils::{ExecutionConfigBuilder, FakeClusterBackend, FakeTestExecutor, ProviderConfigBuilder};

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct Harness {
    core: CoreEngine,
    ops_tx: mpsc::Sender<OperationEvent>,
    ops_rx: mpsc::Receiver<OperationEvent>,
    term_tx: mpsc::Sender<String>,
    term_rx: mpsc::Receiver<String>,
    backend: Arc<FakeClusterBackend>,
}

fn harness(backend: FakeClusterBackend, retry_count: u32, executions: Vec<ExecutionConfig>) -> Harness {
    let backend = Arc::new(backend);
    let dyn_backend: Arc<dyn ClusterBackend> = Arc::clone(&backend) as Arc<dyn ClusterBackend>;

    let provider = Arc::new(
        ProviderConfigBuilder::new("alpha")
            .retry_count(retry_count)
            .build(),
    );
    let group = ClusterGroup::new(
        0,
        provider,
        dyn_backend,
        1,
        PathBuf::from("./target/runtime-fake-test"),
    );

    let executions: Vec<Arc<ExecutionConfig>> = executions.into_iter().map(Arc::new).collect();
    let mut tasks = Vec::new();
    for (exec_id, execution) in executions.iter().enumerate() {
        for name in &execution.tests {
            tasks.push(TestEntry::new(exec_id, &execution.name, name.clone()));
        }
    }

    let core = CoreEngine::new(executions, tasks, vec![group]);
    let (ops_tx, ops_rx) = mpsc::channel(16);
    let (term_tx, term_rx) = mpsc::channel(2);

    Harness {
        core,
        ops_tx,
        ops_rx,
        term_tx,
        term_rx,
        backend,
    }
}

fn options() -> RuntimeOptions {
    RuntimeOptions {
        global_timeout: Duration::from_secs(30),
        stats_interval: None,
        liveness_interval: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn runtime_runs_all_tests_and_destroys_clusters() -> TestResult {
    init_tracing();

    let h = harness(
        FakeClusterBackend::new("./kubeconfig"),
        1,
        vec![ExecutionConfigBuilder::new("suite")
            .test("TestA")
            .test("TestB")
            .build()],
    );

    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeTestExecutor::new(h.ops_tx.clone(), executed.clone());

    let runtime = Runtime::new(h.core, options(), h.ops_rx, h.ops_tx, h.term_rx, executor);
    let core = timeout(Duration::from_secs(5), runtime.run()).await??;

    let keys = executed.lock().unwrap().clone();
    assert_eq!(keys, vec!["suite/TestA".to_string(), "suite/TestB".to_string()]);
    assert_eq!(core.verdict(), RunVerdict::Passed);
    assert_eq!(core.instance_state("alpha-1"), Some(InstanceState::Destroyed));
    assert_eq!(h.backend.start_count(), 1);
    assert_eq!(h.backend.destroy_count(), 1);

    drop(h.term_tx);
    Ok(())
}

#[tokio::test]
async fn runtime_retries_failed_test_until_success() -> TestResult {
    init_tracing();

    let h = harness(
        FakeClusterBackend::new("./kubeconfig"),
        1,
        vec![ExecutionConfigBuilder::new("suite")
            .retries(1)
            .test("TestFlaky")
            .build()],
    );

    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeTestExecutor::new(h.ops_tx.clone(), executed.clone())
        .with_outcomes("suite/TestFlaky", vec![TestOutcome::Failed(2)]);

    let runtime = Runtime::new(h.core, options(), h.ops_rx, h.ops_tx, h.term_rx, executor);
    let core = timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(executed.lock().unwrap().len(), 2);
    assert_eq!(core.tasks()[0].status, TestStatus::Success);
    assert_eq!(core.tasks()[0].attempts, 2);
    assert_eq!(core.verdict(), RunVerdict::Passed);

    drop(h.term_tx);
    Ok(())
}

#[tokio::test]
async fn runtime_fails_tasks_when_provider_cannot_start() -> TestResult {
    init_tracing();

    let h = harness(
        FakeClusterBackend::new("./kubeconfig").failing_starts(1),
        1,
        vec![ExecutionConfigBuilder::new("suite").test("TestOne").build()],
    );

    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeTestExecutor::new(h.ops_tx.clone(), executed.clone());

    let runtime = Runtime::new(h.core, options(), h.ops_rx, h.ops_tx, h.term_rx, executor);
    let core = timeout(Duration::from_secs(5), runtime.run()).await??;

    assert!(executed.lock().unwrap().is_empty());
    assert_eq!(core.tasks()[0].status, TestStatus::Failed);
    assert_eq!(core.tasks()[0].cause, Some(FailCause::NoHealthyProvider));
    assert_eq!(core.verdict(), RunVerdict::Failed);

    drop(h.term_tx);
    Ok(())
}

#[tokio::test]
async fn runtime_shuts_down_on_termination_message() -> TestResult {
    init_tracing();

    let h = harness(
        // Slow start keeps the task pending long enough for the
        // termination message to win.
        FakeClusterBackend::new("./kubeconfig").start_delay(Duration::from_secs(10)),
        1,
        vec![ExecutionConfigBuilder::new("suite").test("TestOne").build()],
    );

    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeTestExecutor::new(h.ops_tx.clone(), executed.clone());

    h.term_tx.send("health probe failed".to_string()).await?;

    let runtime = Runtime::new(h.core, options(), h.ops_rx, h.ops_tx, h.term_rx, executor);
    let core = timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(core.tasks()[0].status, TestStatus::Skipped);
    assert_eq!(core.tasks()[0].cause, Some(FailCause::Interrupted));
    assert_eq!(core.verdict(), RunVerdict::Failed);

    drop(h.term_tx);
    Ok(())
}
