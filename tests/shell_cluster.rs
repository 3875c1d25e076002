// tests/shell_cluster.rs
//
// End-to-end runs against the real shell backend and test executor. Scripts
// are plain `echo`/`exit` commands, so these tests exercise provisioning,
// dispatch, teardown and the persisted log layout without any cloud.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::init_tracing;
use tokio::sync::mpsc;
use tokio::time::timeout;

use skytest::cluster::{ClusterGroup, InstanceState, ShellClusterBackend};
use skytest::config::{ExecutionConfig, ProviderConfig};
use skytest::engine::{CoreEngine, OperationEvent, Runtime, RuntimeOptions};
use skytest::exec::{ExecutionManager, ShellTestExecutor};
use skytest::model::{FailCause, RunVerdict, TestEntry, TestStatus};
use skytest_test_utils::{ExecutionConfigBuilder, ProviderConfigBuilder};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn build_runtime(
    root: &Path,
    providers: Vec<ProviderConfig>,
    executions: Vec<ExecutionConfig>,
    global_timeout: Duration,
) -> Runtime<ShellTestExecutor> {
    let manager = Arc::new(ExecutionManager::new(root));

    let executions: Vec<Arc<ExecutionConfig>> = executions.into_iter().map(Arc::new).collect();
    let mut tasks = Vec::new();
    for (exec_id, execution) in executions.iter().enumerate() {
        for name in &execution.tests {
            tasks.push(TestEntry::new(exec_id, &execution.name, name.clone()));
        }
    }

    let groups = providers
        .into_iter()
        .enumerate()
        .map(|(id, provider)| {
            let provider = Arc::new(provider);
            let desired = provider.instances;
            let backend = Arc::new(ShellClusterBackend::new(
                Arc::clone(&provider),
                Arc::clone(&manager),
            ));
            ClusterGroup::new(id, provider, backend, desired, root.to_path_buf())
        })
        .collect();

    let core = CoreEngine::new(executions, tasks, groups);
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
async fn single_test_passes_on_shell_cluster() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;

    let runtime = build_runtime(
        tmp.path(),
        vec![ProviderConfigBuilder::new("a_provider")
            .script("start", "echo starting")
            .script("stop", "echo stopped")
            .build()],
        vec![ExecutionConfigBuilder::new("simple")
            .test("TestPass")
            .run("echo hello from $TEST_NAME")
            .build()],
        Duration::from_secs(60),
    );

    let core = timeout(Duration::from_secs(20), runtime.run()).await??;

    assert_eq!(core.verdict(), RunVerdict::Passed);
    assert_eq!(core.tasks()[0].status, TestStatus::Success);
    assert_eq!(core.tasks()[0].attempts, 1);
    assert_eq!(
        core.instance_state("a_provider-1"),
        Some(InstanceState::Destroyed)
    );

    // Persisted layout: operation logs under the instance directory.
    let instance_dir = tmp.path().join("a_provider-1");
    assert!(instance_dir.join("start.log").exists());
    assert!(instance_dir.join("stop.log").exists());
    assert!(instance_dir.join("test-TestPass.log").exists());

    Ok(())
}

#[tokio::test]
async fn failing_start_script_exhausts_group_and_fails_test() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;

    let runtime = build_runtime(
        tmp.path(),
        vec![ProviderConfigBuilder::new("b_provider")
            .script("start", "echo starting\nexit 2")
            .retry_count(1)
            .build()],
        vec![ExecutionConfigBuilder::new("simple").test("TestOne").build()],
        Duration::from_secs(60),
    );

    let core = timeout(Duration::from_secs(20), runtime.run()).await??;

    assert_eq!(core.tasks()[0].status, TestStatus::Failed);
    assert_eq!(core.tasks()[0].cause, Some(FailCause::NoHealthyProvider));
    assert_eq!(core.verdict(), RunVerdict::Failed);
    assert_eq!(
        core.instance_state("b_provider-1"),
        Some(InstanceState::Crashed)
    );

    Ok(())
}

#[tokio::test]
async fn healthy_provider_hosts_test_while_broken_one_crashes() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;

    let runtime = build_runtime(
        tmp.path(),
        vec![
            ProviderConfigBuilder::new("a_provider")
                .script("start", "echo starting")
                .build(),
            ProviderConfigBuilder::new("b_provider")
                .script("start", "echo starting\nexit 2")
                .retry_count(1)
                .build(),
        ],
        vec![ExecutionConfigBuilder::new("simple").test("TestOne").build()],
        Duration::from_secs(60),
    );

    let core = timeout(Duration::from_secs(20), runtime.run()).await??;

    assert_eq!(core.verdict(), RunVerdict::Passed);
    assert_eq!(core.tasks()[0].run_on.as_deref(), Some("a_provider-1"));
    assert_eq!(
        core.instance_state("a_provider-1"),
        Some(InstanceState::Destroyed)
    );
    assert_eq!(
        core.instance_state("b_provider-1"),
        Some(InstanceState::Crashed)
    );

    Ok(())
}

#[tokio::test]
async fn execution_env_reaches_the_test_process() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let marker = tmp.path().join("env-marker.txt");

    let runtime = build_runtime(
        tmp.path(),
        vec![ProviderConfigBuilder::new("a_provider").build()],
        vec![ExecutionConfigBuilder::new("simple")
            .test("TestEnv")
            .env("GREETING=hello")
            .run(&format!(
                "printf '%s' \"$GREETING\" > {}",
                marker.display()
            ))
            .build()],
        Duration::from_secs(60),
    );

    let core = timeout(Duration::from_secs(20), runtime.run()).await??;

    assert_eq!(core.verdict(), RunVerdict::Passed);
    assert_eq!(std::fs::read_to_string(&marker)?, "hello");

    Ok(())
}
