// src/engine/core.rs

//! Pure core of the orchestration engine.
//!
//! This is a synchronous, deterministic state machine that consumes
//! [`CoreEvent`]s and produces an updated state plus a list of [`Command`]s
//! for the IO shell. It owns every piece of scheduler state: the task
//! arena, the pending queue, the cluster groups and the teardown phase.
//! Nothing in here touches channels, timers, processes or the filesystem,
//! so the engine's semantics can be unit tested without Tokio.
//!
//! The one concession to the outside world is `ClusterInstance::state`: it
//! is an atomic cell because liveness watchers read it off-loop, but the
//! core remains its only writer.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cluster::{ClusterBackend, ClusterGroup, ClusterInstance, InstanceState};
use crate::config::ExecutionConfig;
use crate::engine::{Command, CoreEvent, CoreStep, OperationEvent};
use crate::model::{FailCause, GroupId, RunVerdict, TaskId, TestEntry, TestOutcome, TestStatus};

/// Why the engine is tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownKind {
    /// Every task reached a terminal status.
    Completed,
    GlobalTimeout,
    /// OS signal or health-check failure.
    Terminated,
}

pub struct CoreEngine {
    pub(crate) executions: Vec<Arc<ExecutionConfig>>,
    pub(crate) tasks: Vec<TestEntry>,
    /// Runnable tasks in dispatch order; retried tasks join at the tail.
    pub(crate) pending: VecDeque<TaskId>,
    /// Tasks with a terminal status, in completion order. Monotonic.
    pub(crate) completed: Vec<TaskId>,
    /// Cluster groups in config order (the scheduler's group tie-break).
    pub(crate) groups: Vec<ClusterGroup>,
    pub(crate) teardown: Option<TeardownKind>,
    /// Destroy workers in flight; the loop exits when this reaches zero
    /// during teardown.
    pub(crate) outstanding_destroys: usize,
    global_timeout_hit: bool,
}

impl CoreEngine {
    pub fn new(
        executions: Vec<Arc<ExecutionConfig>>,
        tasks: Vec<TestEntry>,
        groups: Vec<ClusterGroup>,
    ) -> Self {
        let pending = (0..tasks.len()).collect();
        Self {
            executions,
            tasks,
            pending,
            completed: Vec::new(),
            groups,
            teardown: None,
            outstanding_destroys: 0,
            global_timeout_hit: false,
        }
    }

    /// Initial scheduling pass, before any event has arrived.
    pub fn bootstrap(&mut self) -> CoreStep {
        let mut commands = self.schedule_pass();
        commands.extend(self.maybe_finish());
        self.finish_step(commands)
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: CoreEvent) -> CoreStep {
        let mut commands = match event {
            CoreEvent::Operation(op) => match op {
                OperationEvent::TaskFinished {
                    task,
                    dispatch,
                    outcome,
                    log_file,
                    duration,
                } => self.handle_task_finished(task, dispatch, outcome, log_file, duration),
                OperationEvent::ClusterReady {
                    instance,
                    config_location,
                } => self.handle_cluster_ready(&instance, config_location),
                OperationEvent::ClusterCrashed { instance, cause } => {
                    self.handle_cluster_crashed(&instance, cause)
                }
                OperationEvent::ClusterDestroyed { instance } => {
                    self.handle_cluster_destroyed(&instance)
                }
            },
            CoreEvent::TerminationRequested { reason } => {
                warn!(reason = %reason, "termination requested; beginning shutdown");
                self.begin_teardown(TeardownKind::Terminated)
            }
            CoreEvent::GlobalDeadlineExpired => {
                warn!("global deadline expired; skipping remaining work");
                self.begin_teardown(TeardownKind::GlobalTimeout)
            }
            CoreEvent::StatsTick => {
                self.log_stats();
                Vec::new()
            }
        };

        if self.teardown.is_none() {
            commands.extend(self.schedule_pass());
            commands.extend(self.maybe_finish());
        }

        self.finish_step(commands)
    }

    fn finish_step(&self, commands: Vec<Command>) -> CoreStep {
        let keep_running = !(self.teardown.is_some() && self.outstanding_destroys == 0);
        CoreStep {
            commands,
            keep_running,
        }
    }

    // ---- event handlers -------------------------------------------------

    fn handle_task_finished(
        &mut self,
        task: TaskId,
        dispatch: u32,
        outcome: TestOutcome,
        log_file: Option<PathBuf>,
        duration: Duration,
    ) -> Vec<Command> {
        let Some(entry) = self.tasks.get(task) else {
            warn!(task, "completion for unknown task; ignoring");
            return Vec::new();
        };
        if entry.status != TestStatus::InProgress || entry.dispatches != dispatch {
            debug!(
                task,
                dispatch,
                status = ?entry.status,
                "stale task completion; ignoring"
            );
            return Vec::new();
        }

        let instance_id = entry.run_on.clone().unwrap_or_default();
        let retries = self.executions[entry.execution].retries;
        let entry = &mut self.tasks[task];
        entry.log_file = log_file;
        entry.duration = duration;

        let mut commands = Vec::new();

        match outcome {
            TestOutcome::Success => {
                info!(test = %entry.key, "test succeeded");
                entry.status = TestStatus::Success;
                entry.cause = None;
                entry.message = None;
                self.completed.push(task);
                self.release_instance(&instance_id);
            }
            TestOutcome::Failed(code) => {
                entry.message = Some(format!("exit code {code}"));
                if entry.attempts <= retries {
                    info!(
                        test = %entry.key,
                        attempt = entry.attempts,
                        "test failed; queueing rerun"
                    );
                    entry.status = TestStatus::RerunRequired;
                    self.pending.push_back(task);
                } else {
                    warn!(test = %entry.key, exit_code = code, "test failed permanently");
                    entry.status = TestStatus::Failed;
                    self.completed.push(task);
                }
                self.release_instance(&instance_id);
            }
            TestOutcome::Timeout => {
                entry.message = Some("test deadline expired".to_string());
                if entry.attempts <= retries {
                    info!(
                        test = %entry.key,
                        attempt = entry.attempts,
                        "test timed out; queueing rerun"
                    );
                    entry.status = TestStatus::RerunRequired;
                    self.pending.push_back(task);
                } else {
                    warn!(test = %entry.key, "test timed out permanently");
                    entry.status = TestStatus::Timeout;
                    entry.cause = Some(FailCause::TestTimeout);
                    self.completed.push(task);
                }
                // The test mutated the cluster past its deadline; reusing the
                // instance risks cross-contamination.
                commands.extend(self.destroy_instance(&instance_id));
            }
            TestOutcome::Cancelled => {
                warn!(test = %entry.key, "test cancelled outside shutdown; recording failure");
                entry.status = TestStatus::Failed;
                entry.cause = Some(FailCause::Interrupted);
                self.completed.push(task);
                self.release_instance(&instance_id);
            }
        }

        commands
    }

    fn handle_cluster_ready(&mut self, instance: &str, config_location: PathBuf) -> Vec<Command> {
        let Some((group_id, pos)) = self.find_instance(instance) else {
            warn!(instance, "ready event for unknown instance; ignoring");
            return Vec::new();
        };

        let slot = &self.groups[group_id].slots()[pos];
        if !slot
            .inst
            .state()
            .compare_swap(InstanceState::Starting, InstanceState::Ready)
        {
            debug!(
                instance,
                state = %slot.inst.state().load(),
                "ready event for instance no longer starting; ignoring"
            );
            return Vec::new();
        }

        slot.inst.publish_config_location(config_location);
        info!(instance, "cluster ready");
        Vec::new()
    }

    fn handle_cluster_crashed(&mut self, instance: &str, cause: FailCause) -> Vec<Command> {
        let Some((group_id, pos)) = self.find_instance(instance) else {
            warn!(instance, "crash event for unknown instance; ignoring");
            return Vec::new();
        };

        {
            let slot = &self.groups[group_id].slots()[pos];
            let state = slot.inst.state().load();
            if slot.retired
                || matches!(state, InstanceState::Crashed | InstanceState::Destroyed)
            {
                debug!(instance, state = %state, "stale crash event; ignoring");
                return Vec::new();
            }
            warn!(instance, cause = %cause, state = %state, "cluster crashed");
            slot.inst.state().store(InstanceState::Crashed);
        }

        let mut commands = Vec::new();

        // A task caught mid-run gets a transparent rerun: the crash is
        // cluster-attributable, so the attempt does not count.
        let in_flight = self.groups[group_id]
            .slot_mut(instance)
            .and_then(|slot| slot.task_in_flight.take());
        if let Some(task) = in_flight {
            if self.teardown.is_none() {
                let entry = &mut self.tasks[task];
                if entry.status == TestStatus::InProgress {
                    info!(
                        test = %entry.key,
                        instance,
                        "cluster crashed mid-test; queueing transparent rerun"
                    );
                    entry.attempts = entry.attempts.saturating_sub(1);
                    entry.status = TestStatus::RerunRequired;
                    entry.message = Some(format!("cluster crash ({cause})"));
                    self.pending.push_back(task);
                    commands.push(Command::CancelTest { task });
                }
            }
        }

        self.groups[group_id].notify_crash();

        if self.teardown.is_none() && self.groups[group_id].allow_recycle(instance) {
            info!(instance, "recycling crashed instance");
            self.groups[group_id].slots()[pos]
                .inst
                .state()
                .store(InstanceState::NotStarted);
        } else {
            debug!(instance, "crashed instance retired from pool");
            self.groups[group_id].retire(instance);
        }

        commands
    }

    fn handle_cluster_destroyed(&mut self, instance: &str) -> Vec<Command> {
        let Some((group_id, _)) = self.find_instance(instance) else {
            warn!(instance, "destroyed event for unknown instance; ignoring");
            return Vec::new();
        };

        if let Some(slot) = self.groups[group_id].slot_mut(instance) {
            slot.inst.state().store(InstanceState::Destroyed);
            slot.task_in_flight = None;
        }
        self.outstanding_destroys = self.outstanding_destroys.saturating_sub(1);
        info!(
            instance,
            outstanding = self.outstanding_destroys,
            "cluster destroyed"
        );
        Vec::new()
    }

    // ---- lifecycle helpers ----------------------------------------------

    /// Route an instance towards destruction. Idempotent: calling it on a
    /// `Stopping` or `Destroyed` instance has no effect; calling it on a
    /// `Starting` one cancels the in-flight provisioner and marks the
    /// instance `Crashed`.
    pub fn destroy_instance(&mut self, instance: &str) -> Vec<Command> {
        let Some((group_id, _)) = self.find_instance(instance) else {
            return Vec::new();
        };

        let backend = Arc::clone(self.groups[group_id].backend());
        let timeout = Duration::from_secs(self.groups[group_id].config().timeout);
        let Some(slot) = self.groups[group_id].slot_mut(instance) else {
            return Vec::new();
        };

        match slot.inst.state().load() {
            InstanceState::Stopping | InstanceState::Destroyed => Vec::new(),
            InstanceState::Crashed => Vec::new(),
            InstanceState::NotStarted => {
                // Nothing was ever provisioned.
                slot.inst.state().store(InstanceState::Destroyed);
                Vec::new()
            }
            InstanceState::Starting => {
                info!(instance, "destroy requested while starting; cancelling provisioner");
                slot.inst.state().store(InstanceState::Crashed);
                vec![Command::CancelProvision {
                    instance: instance.to_string(),
                }]
            }
            InstanceState::Ready | InstanceState::Busy => {
                slot.task_in_flight = None;
                slot.inst.state().store(InstanceState::Stopping);
                self.outstanding_destroys += 1;
                vec![Command::DestroyCluster {
                    instance: Arc::clone(&slot.inst),
                    backend,
                    timeout,
                }]
            }
        }
    }

    fn release_instance(&mut self, instance: &str) {
        if let Some((group_id, _)) = self.find_instance(instance) {
            self.groups[group_id].release(instance);
        }
    }

    /// Enter the teardown phase: stop binding work, settle every non-terminal
    /// task, and destroy all live instances.
    fn begin_teardown(&mut self, kind: TeardownKind) -> Vec<Command> {
        if self.teardown.is_some() {
            return Vec::new();
        }
        self.teardown = Some(kind);
        info!(kind = ?kind, "engine teardown started");

        let mut commands = Vec::new();

        match kind {
            TeardownKind::Completed => {}
            TeardownKind::GlobalTimeout => {
                self.global_timeout_hit = true;
                commands.extend(self.settle_remaining(
                    TestStatus::Skipped,
                    TestStatus::Timeout,
                    FailCause::GlobalTimeout,
                ));
            }
            TeardownKind::Terminated => {
                commands.extend(self.settle_remaining(
                    TestStatus::Skipped,
                    TestStatus::Failed,
                    FailCause::Interrupted,
                ));
            }
        }

        // Destroy everything still alive, in group then ordinal order.
        let instance_ids: Vec<String> = self
            .groups
            .iter()
            .flat_map(|g| g.slots().iter())
            .filter(|s| !s.retired)
            .map(|s| s.inst.id().to_string())
            .collect();
        for id in instance_ids {
            commands.extend(self.destroy_instance(&id));
        }

        commands
    }

    /// Give every pending task `pending_status` and every in-flight task
    /// `in_flight_status`, cancelling their workers.
    fn settle_remaining(
        &mut self,
        pending_status: TestStatus,
        in_flight_status: TestStatus,
        cause: FailCause,
    ) -> Vec<Command> {
        let mut commands = Vec::new();

        while let Some(task) = self.pending.pop_front() {
            let entry = &mut self.tasks[task];
            if entry.status.is_runnable() {
                entry.status = pending_status;
                entry.cause = Some(cause);
                self.completed.push(task);
            }
        }

        for task in 0..self.tasks.len() {
            if self.tasks[task].status == TestStatus::InProgress {
                let entry = &mut self.tasks[task];
                entry.status = in_flight_status;
                entry.cause = Some(cause);
                self.completed.push(task);
                commands.push(Command::CancelTest { task });
            }
        }

        commands
    }

    /// When every task is terminal, begin the orderly teardown.
    pub(crate) fn maybe_finish(&mut self) -> Vec<Command> {
        if self.teardown.is_some() {
            return Vec::new();
        }
        if self.tasks.iter().all(|t| t.status.is_terminal()) {
            info!("all tasks completed; destroying clusters");
            return self.begin_teardown(TeardownKind::Completed);
        }
        Vec::new()
    }

    // ---- lookups & reporting --------------------------------------------

    pub(crate) fn find_instance(&self, instance: &str) -> Option<(GroupId, usize)> {
        for group in &self.groups {
            if let Some(pos) = group
                .slots()
                .iter()
                .position(|s| s.inst.id() == instance)
            {
                return Some((group.id(), pos));
            }
        }
        None
    }

    /// Backend owning the given instance, for the shell's liveness watchers.
    pub fn backend_of(&self, instance: &str) -> Option<Arc<dyn ClusterBackend>> {
        self.find_instance(instance)
            .map(|(group_id, _)| Arc::clone(self.groups[group_id].backend()))
    }

    pub fn instance_state(&self, instance: &str) -> Option<InstanceState> {
        self.find_instance(instance).map(|(group_id, pos)| {
            self.groups[group_id].slots()[pos].inst.state().load()
        })
    }

    pub fn instance(&self, instance: &str) -> Option<Arc<ClusterInstance>> {
        self.find_instance(instance).map(|(group_id, pos)| {
            Arc::clone(&self.groups[group_id].slots()[pos].inst)
        })
    }

    pub fn tasks(&self) -> &[TestEntry] {
        &self.tasks
    }

    pub fn executions(&self) -> &[Arc<ExecutionConfig>] {
        &self.executions
    }

    pub fn groups(&self) -> &[ClusterGroup] {
        &self.groups
    }

    pub fn completed(&self) -> &[TaskId] {
        &self.completed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TestStatus::InProgress)
            .count()
    }

    pub fn teardown_kind(&self) -> Option<TeardownKind> {
        self.teardown
    }

    /// Final verdict once the loop has exited.
    pub fn verdict(&self) -> RunVerdict {
        if self.global_timeout_hit {
            RunVerdict::GlobalTimeout
        } else if self
            .tasks
            .iter()
            .all(|t| t.status == TestStatus::Success)
        {
            RunVerdict::Passed
        } else {
            RunVerdict::Failed
        }
    }

    fn log_stats(&self) {
        info!(
            pending = self.pending.len(),
            in_flight = self.in_flight_count(),
            completed = self.completed.len(),
            total = self.tasks.len(),
            "run statistics"
        );
        for group in &self.groups {
            let census: Vec<String> = group
                .census()
                .iter()
                .map(|(state, count)| format!("{state}={count}"))
                .collect();
            info!(
                provider = %group.name(),
                healthy = group.is_healthy(),
                census = %census.join(" "),
                "cluster census"
            );
        }
    }
}

impl std::fmt::Debug for CoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreEngine")
            .field("tasks", &self.tasks.len())
            .field("pending", &self.pending.len())
            .field("completed", &self.completed.len())
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}
