// src/engine/scheduler.rs

//! The scheduling pass.
//!
//! Invoked inline by the core after every state mutation. For each pending
//! task in queue order it intersects the execution's cluster selector with
//! the healthy groups, tries to acquire a `Ready` instance, and otherwise
//! asks the candidate groups (once per pass) to grow towards capacity.
//!
//! Tie-breaks are deterministic: tasks in queue order, groups in config
//! order, instances in ordinal order. Scheduling is non-preemptive.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cluster::{ClusterInstance, InstanceState};
use crate::config::ExecutionConfig;
use crate::engine::core::CoreEngine;
use crate::engine::Command;
use crate::exec::TestJob;
use crate::model::{FailCause, GroupId, TaskId, TestStatus};

impl CoreEngine {
    /// Run one scheduling pass, binding as many pending tasks as possible.
    pub(crate) fn schedule_pass(&mut self) -> Vec<Command> {
        if self.teardown.is_some() {
            return Vec::new();
        }

        let mut commands = Vec::new();
        let mut capacity_checked: HashSet<GroupId> = HashSet::new();
        let mut still_pending = VecDeque::new();

        while let Some(task) = self.pending.pop_front() {
            if !self.tasks[task].status.is_runnable() {
                debug!(task, "skipping non-runnable task in pending queue");
                continue;
            }

            let execution = Arc::clone(&self.executions[self.tasks[task].execution]);
            let candidates = self.candidate_groups(&execution);

            if candidates.is_empty() {
                let entry = &mut self.tasks[task];
                warn!(
                    test = %entry.key,
                    "no healthy provider can host this test; failing it"
                );
                entry.status = TestStatus::Failed;
                entry.cause = Some(FailCause::NoHealthyProvider);
                self.completed.push(task);
                continue;
            }

            let mut acquired = None;
            for group_id in &candidates {
                if let Some(inst) = self.groups[*group_id].acquire_ready(task) {
                    acquired = Some(inst);
                    break;
                }
            }

            match acquired {
                Some(inst) => commands.push(self.bind(task, &execution, inst)),
                None => {
                    // Nothing ready; nudge every candidate group towards its
                    // desired pool size, once per pass.
                    for group_id in candidates {
                        if capacity_checked.insert(group_id) {
                            commands.extend(self.start_group_capacity(group_id));
                        }
                    }
                    still_pending.push_back(task);
                }
            }
        }

        self.pending = still_pending;
        commands
    }

    /// Healthy groups matching the execution's cluster selector, in config
    /// order. An empty selector means "any provider".
    fn candidate_groups(&self, execution: &ExecutionConfig) -> Vec<GroupId> {
        self.groups
            .iter()
            .filter(|g| g.is_healthy())
            .filter(|g| {
                execution.clusters.is_empty()
                    || execution.clusters.iter().any(|name| name == g.name())
            })
            .map(|g| g.id())
            .collect()
    }

    /// Bind a task to an acquired instance and build its dispatch command.
    ///
    /// The instance was swapped `Ready → Busy` inside `acquire_ready`, so
    /// binding and the state swap form one critical section of the loop.
    fn bind(
        &mut self,
        task: TaskId,
        execution: &Arc<ExecutionConfig>,
        inst: Arc<ClusterInstance>,
    ) -> Command {
        let entry = &mut self.tasks[task];
        entry.status = TestStatus::InProgress;
        entry.attempts += 1;
        entry.dispatches += 1;
        entry.run_on = Some(inst.id().to_string());
        entry.artifacts_dir = Some(inst.root().join(&entry.name));
        entry.cause = None;

        let config_location = match inst.config_location() {
            Some(path) => path.to_path_buf(),
            None => {
                // Unreachable with a correct backend: Ready implies the
                // config location was published.
                warn!(instance = %inst.id(), "ready instance has no config location");
                Default::default()
            }
        };

        debug!(
            test = %entry.key,
            instance = %inst.id(),
            attempt = entry.attempts,
            "dispatching test"
        );

        Command::RunTest(TestJob {
            task,
            attempt: entry.attempts,
            dispatch: entry.dispatches,
            key: entry.key.clone(),
            test_name: entry.name.clone(),
            instance_id: inst.id().to_string(),
            instance_root: inst.root().to_path_buf(),
            config_location,
            run_script: execution.run.clone(),
            on_fail: execution.on_fail.clone(),
            env: execution.env.clone(),
            tags: execution.tags.clone(),
            package_root: execution.package_root.clone(),
            timeout: Duration::from_secs(execution.timeout),
        })
    }

    /// Grow a group towards its desired pool size and start every
    /// `NotStarted` instance in it.
    fn start_group_capacity(&mut self, group_id: GroupId) -> Vec<Command> {
        let group = &mut self.groups[group_id];
        group.fill_to_capacity();

        let backend = Arc::clone(group.backend());
        let timeout = Duration::from_secs(group.config().timeout);

        let mut commands = Vec::new();
        for inst in group.not_started() {
            if inst
                .state()
                .compare_swap(InstanceState::NotStarted, InstanceState::Starting)
            {
                debug!(instance = %inst.id(), "starting cluster on scheduler demand");
                commands.push(Command::StartCluster {
                    instance: inst,
                    backend: Arc::clone(&backend),
                    timeout,
                });
            }
        }
        commands
    }
}
