// src/exec/test_runner.rs

//! Individual test attempt runner.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::OperationEvent;
use crate::exec::command::parse_env_entries;
use crate::exec::manager::ExecutionManager;
use crate::model::{TaskId, TestOutcome};

/// Everything a worker needs to run one test attempt. Cloned out of the
/// engine core at dispatch time so workers never touch core state.
#[derive(Debug, Clone)]
pub struct TestJob {
    pub task: TaskId,
    /// Attempt number of this dispatch (1-based, crash reruns excluded).
    pub attempt: u32,
    /// Dispatch sequence number; echoed back in the completion event so the
    /// engine can drop completions from superseded workers.
    pub dispatch: u32,
    pub key: String,
    pub test_name: String,
    pub instance_id: String,
    pub instance_root: PathBuf,
    pub config_location: PathBuf,
    pub run_script: String,
    pub on_fail: Option<String>,
    pub env: Vec<String>,
    pub tags: Vec<String>,
    pub package_root: String,
    /// Per-attempt deadline (the execution's timeout). The global deadline
    /// is enforced separately through cancellation.
    pub timeout: Duration,
}

/// Trait abstracting how test attempts are executed.
///
/// Production code uses [`ShellTestExecutor`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait TestExecutor: Send {
    /// Dispatch the given attempt for execution.
    ///
    /// The implementation must arrange for **exactly one**
    /// `OperationEvent::TaskFinished` to be emitted for this dispatch, even
    /// when the cancel channel fires first.
    fn dispatch(
        &mut self,
        job: TestJob,
        cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real test executor: runs the execution's `run` script with the shell
/// contract environment and streams output to the instance's log.
pub struct ShellTestExecutor {
    events: mpsc::Sender<OperationEvent>,
    manager: Arc<ExecutionManager>,
    /// How long a SIGTERM'd process gets before SIGKILL.
    grace: Duration,
}

impl ShellTestExecutor {
    pub fn new(events: mpsc::Sender<OperationEvent>, manager: Arc<ExecutionManager>) -> Self {
        Self {
            events,
            manager,
            grace: Duration::from_secs(2),
        }
    }
}

impl TestExecutor for ShellTestExecutor {
    fn dispatch(
        &mut self,
        job: TestJob,
        cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let events = self.events.clone();
        let manager = Arc::clone(&self.manager);
        let grace = self.grace;

        Box::pin(async move {
            tokio::spawn(run_test(job, events, cancel, manager, grace));
            Ok(())
        })
    }
}

/// Run a single test attempt and emit exactly one `TaskFinished`.
///
/// All setup errors are converted into a failed completion with exit code
/// -1, so the engine never waits on a worker that died early.
async fn run_test(
    job: TestJob,
    events: mpsc::Sender<OperationEvent>,
    cancel: oneshot::Receiver<()>,
    manager: Arc<ExecutionManager>,
    grace: Duration,
) {
    let started = Instant::now();
    let task = job.task;
    let dispatch = job.dispatch;
    let key = job.key.clone();

    let (outcome, log_file) = match run_test_inner(&job, cancel, &manager, grace).await {
        Ok(result) => result,
        Err(err) => {
            error!(test = %key, error = %format!("{err:#}"), "test execution error");
            (TestOutcome::Failed(-1), None)
        }
    };

    let _ = events
        .send(OperationEvent::TaskFinished {
            task,
            dispatch,
            outcome,
            log_file,
            duration: started.elapsed(),
        })
        .await;
}

async fn run_test_inner(
    job: &TestJob,
    mut cancel: oneshot::Receiver<()>,
    manager: &ExecutionManager,
    grace: Duration,
) -> Result<(TestOutcome, Option<PathBuf>)> {
    let artifacts_dir =
        prepare_artifacts_dir(&job.instance_root, &job.test_name, job.attempt).await?;

    let (log_path, mut log) = manager
        .open_log(&job.instance_id, &format!("test-{}", job.test_name))
        .await?;

    let env = test_env(job, &artifacts_dir);

    info!(
        test = %job.key,
        instance = %job.instance_id,
        attempt = job.attempt,
        timeout = ?job.timeout,
        "starting test process"
    );

    let mut child = spawn_test_process(&job.run_script, &env, &mut log).await?;

    let deadline = tokio::time::sleep(job.timeout);
    tokio::pin!(deadline);

    let outcome = tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for test process of '{}'", job.key))?;
            let code = status.code().unwrap_or(-1);
            info!(
                test = %job.key,
                exit_code = code,
                success = status.success(),
                "test process exited"
            );
            if status.success() {
                TestOutcome::Success
            } else {
                TestOutcome::Failed(code)
            }
        }

        () = &mut deadline => {
            warn!(test = %job.key, timeout = ?job.timeout, "test deadline expired; terminating");
            graceful_kill(&mut child, grace).await;
            TestOutcome::Timeout
        }

        cancel_res = &mut cancel => {
            match cancel_res {
                Ok(()) => info!(test = %job.key, "cancellation requested; killing test process"),
                Err(_) => debug!(test = %job.key, "cancel channel closed; killing test process"),
            }
            if let Err(e) = child.kill().await {
                warn!(test = %job.key, error = %e, "failed to kill test process on cancellation");
            }
            TestOutcome::Cancelled
        }
    };

    if matches!(outcome, TestOutcome::Failed(_) | TestOutcome::Timeout) {
        run_on_fail(job, &env, &mut log).await;
    }

    log.flush().await?;
    Ok((outcome, Some(log_path)))
}

/// Environment of a test run, per the shell execution contract.
fn test_env(job: &TestJob, artifacts_dir: &Path) -> Vec<(String, String)> {
    let mut env = vec![
        (
            "CLUSTER_CONFIG".to_string(),
            job.config_location.display().to_string(),
        ),
        (
            "ARTIFACTS_DIR".to_string(),
            artifacts_dir.display().to_string(),
        ),
        ("TEST_NAME".to_string(), job.test_name.clone()),
        ("TAGS".to_string(), job.tags.join(",")),
        ("PACKAGE_ROOT".to_string(), job.package_root.clone()),
    ];
    env.extend(parse_env_entries(&job.env));
    env
}

async fn spawn_test_process(
    script: &str,
    env: &[(String, String)],
    log: &mut tokio::fs::File,
) -> Result<Child> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    for (key, value) in env {
        command.env(key, value);
    }
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().context("spawning test process")?;

    // Stream both pipes into the log so buffers never fill.
    if let Some(stdout) = child.stdout.take() {
        if let Ok(mut file) = log.try_clone().await {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = file.write_all(format!("{line}\n").as_bytes()).await;
                }
            });
        }
    }
    if let Some(stderr) = child.stderr.take() {
        if let Ok(mut file) = log.try_clone().await {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = file.write_all(format!("{line}\n").as_bytes()).await;
                }
            });
        }
    }

    Ok(child)
}

/// SIGTERM, a short grace period, then SIGKILL.
async fn graceful_kill(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .status()
            .await;
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to SIGKILL test process");
    }
}

/// Best-effort failure diagnostics hook.
async fn run_on_fail(job: &TestJob, env: &[(String, String)], log: &mut tokio::fs::File) {
    let Some(script) = job.on_fail.as_deref() else {
        return;
    };

    debug!(test = %job.key, "running on_fail script");
    let _ = log.write_all(b"on_fail:\n").await;

    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    for (key, value) in env {
        command.env(key, value);
    }
    command.stdin(Stdio::null()).kill_on_drop(true);

    match tokio::time::timeout(Duration::from_secs(60), command.output()).await {
        Ok(Ok(output)) => {
            let _ = log.write_all(&output.stdout).await;
            let _ = log.write_all(&output.stderr).await;
        }
        Ok(Err(e)) => warn!(test = %job.key, error = %e, "on_fail script failed to spawn"),
        Err(_) => warn!(test = %job.key, "on_fail script timed out"),
    }
}

/// Create the artifacts directory for an attempt.
///
/// Attempt 1 writes directly into `<instance-root>/<test-name>`. Later
/// attempts first move any existing entries into an `attempt-<n>`
/// subdirectory so earlier results are preserved.
pub async fn prepare_artifacts_dir(
    instance_root: &Path,
    test_name: &str,
    attempt: u32,
) -> Result<PathBuf> {
    let dir = instance_root.join(test_name);

    if attempt > 1 && fs::try_exists(&dir).await.unwrap_or(false) {
        let previous = dir.join(format!("attempt-{}", attempt - 1));
        fs::create_dir_all(&previous).await?;

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("attempt-") {
                continue;
            }
            fs::rename(entry.path(), previous.join(&name)).await?;
        }
    }

    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating artifacts directory {:?}", dir))?;
    Ok(dir)
}
