// src/model.rs

//! Test and task model shared between discovery, the engine and reporting.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Index of a task in the engine's task arena.
pub type TaskId = usize;

/// Index of a cluster group in the engine's group arena.
pub type GroupId = usize;

/// Index of an execution in the engine's execution list.
pub type ExecId = usize;

/// Lifecycle status of a test entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    /// Discovered, waiting for an eligible cluster instance.
    Pending,
    /// Bound to an instance and currently running.
    InProgress,
    Success,
    Failed,
    Timeout,
    /// Never dispatched (global timeout or shutdown).
    Skipped,
    /// Failed attempt with retry budget left; queued for another run.
    RerunRequired,
}

impl TestStatus {
    /// Terminal statuses are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TestStatus::Success | TestStatus::Failed | TestStatus::Timeout | TestStatus::Skipped
        )
    }

    /// Statuses the scheduler may bind to an instance.
    pub fn is_runnable(self) -> bool {
        matches!(self, TestStatus::Pending | TestStatus::RerunRequired)
    }
}

/// Outcome of a single test attempt, as reported by the executor worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Success,
    Failed(i32), // exit code
    Timeout,
    /// The worker was cancelled before the process finished.
    Cancelled,
}

/// Why a task or cluster ended up where it did. Rendered into logs and the
/// report as kebab-case strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailCause {
    Startup,
    Liveness,
    ClusterCrash,
    TestTimeout,
    GlobalTimeout,
    NoHealthyProvider,
    Interrupted,
}

impl fmt::Display for FailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailCause::Startup => "startup",
            FailCause::Liveness => "liveness",
            FailCause::ClusterCrash => "cluster-crash",
            FailCause::TestTimeout => "test-timeout",
            FailCause::GlobalTimeout => "global-timeout",
            FailCause::NoHealthyProvider => "no-healthy-provider",
            FailCause::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// One runnable test: immutable identity plus the mutable run record.
///
/// Mutated only by the engine core (binding, completion); workers learn about
/// it through cloned job descriptions.
#[derive(Debug, Clone)]
pub struct TestEntry {
    /// Owning execution, as an index into the engine's execution list.
    pub execution: ExecId,

    /// `<execution-name>/<test-name>`; unique across the run.
    pub key: String,

    /// Bare test name; also the artifact directory name under the instance
    /// root.
    pub name: String,

    pub status: TestStatus,

    /// Dispatch count. Only test-attributable attempts are counted; cluster
    /// crashes roll this back.
    pub attempts: u32,

    /// Monotonic dispatch sequence number; unlike `attempts` it is never
    /// rolled back, so completions from superseded workers can be told
    /// apart from the current one.
    pub dispatches: u32,

    /// ID of the last instance that executed this test, if any.
    pub run_on: Option<String>,

    /// Artifact directory of the latest attempt.
    pub artifacts_dir: Option<PathBuf>,

    /// Log file of the latest attempt.
    pub log_file: Option<PathBuf>,

    /// Infrastructure cause for a terminal Failed/Timeout/Skipped status.
    pub cause: Option<FailCause>,

    /// Human-readable detail for the report (e.g. "exit code 2").
    pub message: Option<String>,

    /// Duration of the latest attempt.
    pub duration: Duration,
}

impl TestEntry {
    pub fn new(execution: ExecId, execution_name: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            execution,
            key: format!("{execution_name}/{name}"),
            name,
            status: TestStatus::Pending,
            attempts: 0,
            dispatches: 0,
            run_on: None,
            artifacts_dir: None,
            log_file: None,
            cause: None,
            message: None,
            duration: Duration::ZERO,
        }
    }
}

/// Final verdict of a run, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunVerdict {
    Passed,
    Failed,
    NoTests,
    GlobalTimeout,
}

impl RunVerdict {
    pub fn exit_code(self) -> i32 {
        match self {
            RunVerdict::Passed => 0,
            RunVerdict::Failed => 1,
            RunVerdict::NoTests => 3,
            RunVerdict::GlobalTimeout => 4,
        }
    }
}
