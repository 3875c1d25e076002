// src/cluster/group.rs

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cluster::backend::ClusterBackend;
use crate::cluster::instance::ClusterInstance;
use crate::cluster::state::InstanceState;
use crate::config::ProviderConfig;
use crate::model::{GroupId, TaskId};

/// One pool slot. Slots are never reordered, so instance ordinals stay
/// aligned with slot positions and scheduling stays deterministic.
#[derive(Debug)]
pub struct InstanceSlot {
    pub inst: Arc<ClusterInstance>,
    /// Task currently bound to this instance; `Some` iff the state is `Busy`.
    pub task_in_flight: Option<TaskId>,
    /// Restart budget of this particular instance.
    pub retries_remaining: u32,
    /// Set when a crashed instance is dropped from the pool for good.
    pub retired: bool,
}

/// Pool of instances for one provider, plus the pool-wide crash budget.
///
/// Accounting only: the group decides *what* should happen (which instance
/// to hand out, whether a crashed one may recycle); the engine core turns
/// those decisions into state transitions and worker commands.
pub struct ClusterGroup {
    id: GroupId,
    config: Arc<ProviderConfig>,
    backend: Arc<dyn ClusterBackend>,
    slots: Vec<InstanceSlot>,
    /// Remaining pool-wide crash budget; at zero the group is unhealthy.
    retry_budget: u32,
    unhealthy: bool,
    /// Desired pool size (config `instances`, possibly capped by `--count`).
    desired: usize,
    next_ordinal: usize,
    run_root: PathBuf,
}

impl ClusterGroup {
    pub fn new(
        id: GroupId,
        config: Arc<ProviderConfig>,
        backend: Arc<dyn ClusterBackend>,
        desired: usize,
        run_root: PathBuf,
    ) -> Self {
        let retry_budget = config.retry_count;
        Self {
            id,
            config,
            backend,
            slots: Vec::new(),
            retry_budget,
            unhealthy: false,
            desired: desired.max(1),
            next_ordinal: 1,
            run_root,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &Arc<ProviderConfig> {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ClusterBackend> {
        &self.backend
    }

    pub fn is_healthy(&self) -> bool {
        !self.unhealthy
    }

    pub fn slots(&self) -> &[InstanceSlot] {
        &self.slots
    }

    /// Hand out a `Ready` instance, atomically swapping it to `Busy` and
    /// recording the bound task. Instances are tried in ordinal order.
    pub fn acquire_ready(&mut self, task: TaskId) -> Option<Arc<ClusterInstance>> {
        for slot in self.slots.iter_mut().filter(|s| !s.retired) {
            if slot
                .inst
                .state()
                .compare_swap(InstanceState::Ready, InstanceState::Busy)
            {
                slot.task_in_flight = Some(task);
                debug!(
                    instance = %slot.inst.id(),
                    task,
                    "instance acquired for task"
                );
                return Some(Arc::clone(&slot.inst));
            }
        }
        None
    }

    /// Return a `Busy` instance to `Ready`, clearing the bound task.
    pub fn release(&mut self, instance_id: &str) {
        if let Some(slot) = self.slot_mut(instance_id) {
            slot.task_in_flight = None;
            if !slot
                .inst
                .state()
                .compare_swap(InstanceState::Busy, InstanceState::Ready)
            {
                debug!(
                    instance = %instance_id,
                    state = %slot.inst.state().load(),
                    "release on instance that is no longer busy"
                );
            }
        }
    }

    /// Record a crash against the pool budget. Returns true if the group
    /// just became unhealthy.
    pub fn notify_crash(&mut self) -> bool {
        if self.unhealthy {
            return false;
        }
        if self.retry_budget > 0 {
            self.retry_budget -= 1;
        }
        if self.retry_budget == 0 {
            self.unhealthy = true;
            warn!(
                provider = %self.config.name,
                "crash budget exhausted; marking group unhealthy"
            );
            return true;
        }
        info!(
            provider = %self.config.name,
            remaining = self.retry_budget,
            "cluster crash consumed one pool retry"
        );
        false
    }

    /// Whether a crashed instance may be restarted. Consumes one unit of the
    /// instance's own budget on success.
    pub fn allow_recycle(&mut self, instance_id: &str) -> bool {
        if self.unhealthy {
            return false;
        }
        match self.slot_mut(instance_id) {
            Some(slot) if slot.retries_remaining > 0 => {
                slot.retries_remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Drop a crashed instance from the pool for good.
    pub fn retire(&mut self, instance_id: &str) {
        if let Some(slot) = self.slot_mut(instance_id) {
            slot.retired = true;
            slot.task_in_flight = None;
        }
    }

    /// Instances in a state that counts against `desired`.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !s.retired && s.inst.state().load().is_live())
            .count()
    }

    /// Create fresh `NotStarted` slots until the live count reaches the
    /// desired pool size. Returns nothing when the group is unhealthy.
    pub fn fill_to_capacity(&mut self) -> Vec<Arc<ClusterInstance>> {
        let mut created = Vec::new();
        if self.unhealthy {
            return created;
        }

        // Freshly pushed slots are NotStarted and count as live immediately.
        while self.live_count() < self.desired {
            let inst = Arc::new(ClusterInstance::new(
                &self.config.name,
                self.next_ordinal,
                self.id,
                &self.run_root,
            ));
            self.next_ordinal += 1;
            info!(instance = %inst.id(), "created new pool slot");
            created.push(Arc::clone(&inst));
            self.slots.push(InstanceSlot {
                inst,
                task_in_flight: None,
                retries_remaining: self.config.retry_count,
                retired: false,
            });
        }

        created
    }

    /// Instances waiting in `NotStarted`, in ordinal order.
    pub fn not_started(&self) -> Vec<Arc<ClusterInstance>> {
        self.slots
            .iter()
            .filter(|s| !s.retired && s.inst.state().load() == InstanceState::NotStarted)
            .map(|s| Arc::clone(&s.inst))
            .collect()
    }

    pub fn slot(&self, instance_id: &str) -> Option<&InstanceSlot> {
        self.slots.iter().find(|s| s.inst.id() == instance_id)
    }

    pub fn slot_mut(&mut self, instance_id: &str) -> Option<&mut InstanceSlot> {
        self.slots.iter_mut().find(|s| s.inst.id() == instance_id)
    }

    /// Per-state census for the stats ticker.
    pub fn census(&self) -> Vec<(InstanceState, usize)> {
        let mut counts: Vec<(InstanceState, usize)> = Vec::new();
        for slot in &self.slots {
            let state = slot.inst.state().load();
            match counts.iter_mut().find(|(s, _)| *s == state) {
                Some((_, n)) => *n += 1,
                None => counts.push((state, 1)),
            }
        }
        counts
    }
}

impl std::fmt::Debug for ClusterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterGroup")
            .field("name", &self.config.name)
            .field("slots", &self.slots.len())
            .field("retry_budget", &self.retry_budget)
            .field("unhealthy", &self.unhealthy)
            .finish_non_exhaustive()
    }
}
