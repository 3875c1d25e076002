// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the per-provider cluster pools and their lifecycle state machines
//! - the scheduler that pairs pending tests with `Ready` instances
//! - the main event loop reacting to:
//!   - task completion events from test workers
//!   - cluster lifecycle events from provisioning/destroy workers
//!   - OS signals and health-check failures
//!   - the stats ticker and the global deadline
//!
//! The pure core state machine lives in [`core`] (no channels, no Tokio, no
//! IO — extensively testable in isolation); the async shell that owns the
//! channels, timers and worker tasks is implemented in [`runtime`]. The
//! scheduling pass itself lives in [`scheduler`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ClusterBackend, ClusterInstance};
use crate::exec::TestJob;
use crate::model::{FailCause, TaskId, TestOutcome};

pub mod core;
pub mod health;
pub mod runtime;
pub mod scheduler;

pub use self::core::{CoreEngine, TeardownKind};
pub use self::runtime::{Runtime, RuntimeOptions};

/// Events emitted by worker tasks onto the operation channel.
///
/// Every worker emits exactly one terminal event; the core drops events
/// that no longer match its state (stale attempts, instances it already
/// moved on from).
#[derive(Debug, Clone)]
pub enum OperationEvent {
    TaskFinished {
        task: TaskId,
        /// Dispatch sequence number this worker was issued with; stale
        /// numbers identify superseded workers.
        dispatch: u32,
        outcome: TestOutcome,
        log_file: Option<PathBuf>,
        duration: Duration,
    },
    ClusterReady {
        instance: String,
        config_location: PathBuf,
    },
    ClusterCrashed {
        instance: String,
        cause: FailCause,
    },
    ClusterDestroyed {
        instance: String,
    },
}

/// Inputs to the pure core, as translated by the async shell.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Operation(OperationEvent),
    /// OS signal or health-check failure.
    TerminationRequested { reason: String },
    GlobalDeadlineExpired,
    StatsTick,
}

/// Command produced by the pure core, to be executed by the outer IO shell.
pub enum Command {
    /// Spawn a provisioning worker with the provider's start deadline.
    StartCluster {
        instance: Arc<ClusterInstance>,
        backend: Arc<dyn ClusterBackend>,
        timeout: Duration,
    },
    /// Spawn a destroy worker; completion arrives as `ClusterDestroyed`.
    DestroyCluster {
        instance: Arc<ClusterInstance>,
        backend: Arc<dyn ClusterBackend>,
        timeout: Duration,
    },
    /// Cancel an in-flight provisioning worker.
    CancelProvision { instance: String },
    /// Dispatch a test attempt to the executor.
    RunTest(TestJob),
    /// Cancel an in-flight test worker.
    CancelTest { task: TaskId },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::StartCluster { instance, .. } => f
                .debug_struct("StartCluster")
                .field("instance", &instance.id())
                .finish_non_exhaustive(),
            Command::DestroyCluster { instance, .. } => f
                .debug_struct("DestroyCluster")
                .field("instance", &instance.id())
                .finish_non_exhaustive(),
            Command::CancelProvision { instance } => f
                .debug_struct("CancelProvision")
                .field("instance", instance)
                .finish(),
            Command::RunTest(job) => f
                .debug_struct("RunTest")
                .field("task", &job.task)
                .field("key", &job.key)
                .field("instance", &job.instance_id)
                .finish_non_exhaustive(),
            Command::CancelTest { task } => {
                f.debug_struct("CancelTest").field("task", task).finish()
            }
        }
    }
}

/// Decision returned by the core after handling a single event.
#[derive(Debug)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<Command>,
    /// Whether the outer event loop should keep running.
    pub keep_running: bool,
}
