// tests/artifacts.rs
//
// The engine provides every test attempt with a fresh artifacts directory
// under its instance root; earlier attempts are preserved.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::init_tracing;
use tokio::sync::mpsc;
use tokio::time::timeout;

use skytest::cluster::{ClusterGroup, ShellClusterBackend};
use skytest::config::ExecutionConfig;
use skytest::engine::{CoreEngine, OperationEvent, Runtime, RuntimeOptions};
use skytest::exec::{prepare_artifacts_dir, ExecutionManager, ShellTestExecutor};
use skytest::model::{RunVerdict, TestEntry};
use skytest_test_utils::{ExecutionConfigBuilder, ProviderConfigBuilder};

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn run_single_execution(root: &Path, execution: ExecutionConfig) -> TestResult {
    let manager = Arc::new(ExecutionManager::new(root));
    let provider = Arc::new(ProviderConfigBuilder::new("provider").build());
    let backend = Arc::new(ShellClusterBackend::new(
        Arc::clone(&provider),
        Arc::clone(&manager),
    ));
    let group = ClusterGroup::new(0, provider, backend, 1, root.to_path_buf());

    let execution = Arc::new(execution);
    let tasks: Vec<TestEntry> = execution
        .tests
        .iter()
        .map(|name| TestEntry::new(0, &execution.name, name.clone()))
        .collect();

    let core = CoreEngine::new(vec![Arc::clone(&execution)], tasks, vec![group]);
    let (ops_tx, ops_rx) = mpsc::channel::<OperationEvent>(16);
    let (_term_tx, term_rx) = mpsc::channel::<String>(2);
    let executor = ShellTestExecutor::new(ops_tx.clone(), manager);
    let options = RuntimeOptions {
        global_timeout: Duration::from_secs(60),
        stats_interval: None,
        liveness_interval: Duration::from_secs(30),
    };

    let runtime = Runtime::new(core, options, ops_rx, ops_tx, term_rx, executor);
    let core = timeout(Duration::from_secs(20), runtime.run()).await??;
    assert_eq!(core.verdict(), RunVerdict::Passed);
    Ok(())
}

#[tokio::test]
async fn each_test_gets_an_artifacts_dir() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;

    run_single_execution(
        tmp.path(),
        ExecutionConfigBuilder::new("simple")
            .tag("artifacts")
            .test("TestArtifacts")
            .run("printf 'test result' > \"$ARTIFACTS_DIR/artifact1.txt\"")
            .build(),
    )
    .await?;

    let artifact = tmp
        .path()
        .join("provider-1")
        .join("TestArtifacts")
        .join("artifact1.txt");
    assert_eq!(std::fs::read_to_string(&artifact)?, "test result");

    Ok(())
}

#[tokio::test]
async fn retried_attempt_gets_a_fresh_dir_and_keeps_old_artifacts() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("inst-root");

    // First attempt writes directly into the test's directory.
    let first = prepare_artifacts_dir(&root, "TestKeep", 1).await?;
    std::fs::write(first.join("out.txt"), "attempt one")?;

    // Second attempt starts clean; the old file moves under attempt-1.
    let second = prepare_artifacts_dir(&root, "TestKeep", 2).await?;
    assert_eq!(first, second);
    assert!(!second.join("out.txt").exists());
    assert_eq!(
        std::fs::read_to_string(second.join("attempt-1").join("out.txt"))?,
        "attempt one"
    );

    // A third attempt stacks another archive without touching attempt-1.
    std::fs::write(second.join("out.txt"), "attempt two")?;
    let third = prepare_artifacts_dir(&root, "TestKeep", 3).await?;
    assert_eq!(
        std::fs::read_to_string(third.join("attempt-1").join("out.txt"))?,
        "attempt one"
    );
    assert_eq!(
        std::fs::read_to_string(third.join("attempt-2").join("out.txt"))?,
        "attempt two"
    );

    Ok(())
}
