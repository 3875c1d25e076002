// src/engine/runtime.rs

//! Async IO shell around the pure [`CoreEngine`].
//!
//! Owns the operation channel, the termination channel, the stats ticker
//! and the global deadline, and turns core commands into worker tasks.
//! All scheduler state lives in the core; workers communicate results
//! exclusively through `OperationEvent`s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterBackend, ClusterInstance};
use crate::engine::core::CoreEngine;
use crate::engine::{Command, CoreEvent, CoreStep, OperationEvent};
use crate::errors::Result;
use crate::exec::TestExecutor;
use crate::model::{FailCause, TaskId};

/// Options that influence how the runtime behaves.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Wall-clock budget for the entire run.
    pub global_timeout: Duration,
    /// Period of the stats log line; `None` disables the ticker.
    pub stats_interval: Option<Duration>,
    /// Period of per-instance liveness probes.
    pub liveness_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            global_timeout: Duration::from_secs(7200),
            stats_interval: Some(Duration::from_secs(60)),
            liveness_interval: Duration::from_secs(30),
        }
    }
}

/// The main event loop: a single consumer over worker events, termination
/// requests, the stats ticker and the global deadline.
pub struct Runtime<E: TestExecutor> {
    core: CoreEngine,
    options: RuntimeOptions,
    ops_rx: mpsc::Receiver<OperationEvent>,
    /// Kept so worker spawns always have a sender to clone, and so the ops
    /// channel never closes under the loop.
    ops_tx: mpsc::Sender<OperationEvent>,
    term_rx: mpsc::Receiver<String>,
    executor: E,

    /// Cancel handles for in-flight provisioning workers, by instance ID.
    provision_cancels: HashMap<String, oneshot::Sender<()>>,
    /// Cancel handles for in-flight test workers, by task.
    task_cancels: HashMap<TaskId, oneshot::Sender<()>>,
    /// Liveness watchers, by instance ID; replaced on re-provision.
    liveness_watchers: HashMap<String, tokio::task::JoinHandle<()>>,
}

impl<E: TestExecutor> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: TestExecutor> Runtime<E> {
    pub fn new(
        core: CoreEngine,
        options: RuntimeOptions,
        ops_rx: mpsc::Receiver<OperationEvent>,
        ops_tx: mpsc::Sender<OperationEvent>,
        term_rx: mpsc::Receiver<String>,
        executor: E,
    ) -> Self {
        Self {
            core,
            options,
            ops_rx,
            ops_tx,
            term_rx,
            executor,
            provision_cancels: HashMap::new(),
            task_cancels: HashMap::new(),
            liveness_watchers: HashMap::new(),
        }
    }

    /// Run the loop to completion and hand the final core state back for
    /// reporting.
    pub async fn run(mut self) -> Result<CoreEngine> {
        info!("engine runtime started");

        let started = Instant::now();
        let deadline = tokio::time::sleep_until(started + self.options.global_timeout);
        tokio::pin!(deadline);
        let mut deadline_fired = false;

        let stats_enabled = self.options.stats_interval.is_some();
        let stats_period = self
            .options
            .stats_interval
            .unwrap_or(Duration::from_secs(3600));
        let mut stats_ticker =
            tokio::time::interval_at(started + stats_period, stats_period);
        stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let step = self.core.bootstrap();
        if !self.execute(step).await? {
            info!("nothing to run; engine runtime exiting");
            return Ok(self.core);
        }

        loop {
            let step = tokio::select! {
                Some(event) = self.ops_rx.recv() => {
                    debug!(?event, "runtime received event");
                    self.note_event(&event);
                    self.core.step(CoreEvent::Operation(event))
                }

                Some(reason) = self.term_rx.recv() => {
                    self.core.step(CoreEvent::TerminationRequested { reason })
                }

                () = &mut deadline, if !deadline_fired => {
                    deadline_fired = true;
                    self.core.step(CoreEvent::GlobalDeadlineExpired)
                }

                _ = stats_ticker.tick(), if stats_enabled => {
                    self.core.step(CoreEvent::StatsTick)
                }
            };

            if !self.execute(step).await? {
                break;
            }
        }

        for (_, watcher) in self.liveness_watchers.drain() {
            watcher.abort();
        }

        info!("engine runtime exiting");
        Ok(self.core)
    }

    /// Housekeeping keyed off events before the core consumes them.
    fn note_event(&mut self, event: &OperationEvent) {
        match event {
            OperationEvent::TaskFinished { task, dispatch, .. } => {
                // A stale completion must not strip the cancel handle of the
                // worker that superseded it.
                let current = self
                    .core
                    .tasks()
                    .get(*task)
                    .map_or(true, |t| t.dispatches == *dispatch);
                if current {
                    self.task_cancels.remove(task);
                }
            }
            OperationEvent::ClusterReady { instance, .. } => {
                self.provision_cancels.remove(instance);
                self.spawn_liveness_watcher(instance);
            }
            OperationEvent::ClusterCrashed { instance, .. } => {
                self.provision_cancels.remove(instance);
            }
            OperationEvent::ClusterDestroyed { instance } => {
                if let Some(watcher) = self.liveness_watchers.remove(instance) {
                    watcher.abort();
                }
            }
        }
    }

    /// Execute the commands of a core step. Returns the step's
    /// `keep_running`.
    async fn execute(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            match command {
                Command::StartCluster {
                    instance,
                    backend,
                    timeout,
                } => {
                    let (cancel_tx, cancel_rx) = oneshot::channel();
                    self.provision_cancels
                        .insert(instance.id().to_string(), cancel_tx);
                    tokio::spawn(provision_worker(
                        instance,
                        backend,
                        timeout,
                        cancel_rx,
                        self.ops_tx.clone(),
                    ));
                }

                Command::DestroyCluster {
                    instance,
                    backend,
                    timeout,
                } => {
                    tokio::spawn(destroy_worker(
                        instance,
                        backend,
                        timeout,
                        self.ops_tx.clone(),
                    ));
                }

                Command::CancelProvision { instance } => {
                    if let Some(cancel) = self.provision_cancels.remove(&instance) {
                        let _ = cancel.send(());
                    }
                }

                Command::RunTest(job) => {
                    // The worker arms the execution timeout itself; the
                    // global deadline cancels in-flight work on expiry, so
                    // the effective deadline is the smaller of the two.
                    let (cancel_tx, cancel_rx) = oneshot::channel();
                    self.task_cancels.insert(job.task, cancel_tx);
                    self.executor.dispatch(job, cancel_rx).await?;
                }

                Command::CancelTest { task } => {
                    if let Some(cancel) = self.task_cancels.remove(&task) {
                        let _ = cancel.send(());
                    }
                }
            }
        }

        Ok(step.keep_running)
    }

    fn spawn_liveness_watcher(&mut self, instance_id: &str) {
        let Some(inst) = self.core.instance(instance_id) else {
            return;
        };
        let Some(backend) = self.core.backend_of(instance_id) else {
            return;
        };

        let interval = self.options.liveness_interval;
        let events = self.ops_tx.clone();

        let handle = tokio::spawn(liveness_watcher(inst, backend, interval, events));
        if let Some(previous) = self
            .liveness_watchers
            .insert(instance_id.to_string(), handle)
        {
            previous.abort();
        }
    }
}

/// Provision one cluster and emit exactly one lifecycle event.
async fn provision_worker(
    inst: Arc<ClusterInstance>,
    backend: Arc<dyn ClusterBackend>,
    timeout: Duration,
    cancel: oneshot::Receiver<()>,
    events: mpsc::Sender<OperationEvent>,
) {
    let instance = inst.id().to_string();

    let event = tokio::select! {
        result = tokio::time::timeout(timeout, backend.start(Arc::clone(&inst))) => {
            match result {
                Ok(Ok(cluster)) => OperationEvent::ClusterReady {
                    instance: instance.clone(),
                    config_location: cluster.config_location,
                },
                Ok(Err(err)) => {
                    error!(
                        instance = %instance,
                        error = %format!("{err:#}"),
                        "cluster start failed"
                    );
                    OperationEvent::ClusterCrashed {
                        instance: instance.clone(),
                        cause: FailCause::Startup,
                    }
                }
                Err(_) => {
                    error!(instance = %instance, ?timeout, "cluster start timed out");
                    OperationEvent::ClusterCrashed {
                        instance: instance.clone(),
                        cause: FailCause::Startup,
                    }
                }
            }
        }

        _ = cancel => {
            info!(instance = %instance, "cluster provisioning cancelled");
            OperationEvent::ClusterCrashed {
                instance: instance.clone(),
                cause: FailCause::Interrupted,
            }
        }
    };

    let _ = events.send(event).await;
}

/// Destroy one cluster. Always reports `ClusterDestroyed`; a failed destroy
/// is logged but doesn't keep the instance alive in the engine.
async fn destroy_worker(
    inst: Arc<ClusterInstance>,
    backend: Arc<dyn ClusterBackend>,
    timeout: Duration,
    events: mpsc::Sender<OperationEvent>,
) {
    let instance = inst.id().to_string();

    match tokio::time::timeout(timeout, backend.destroy(inst)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(
                instance = %instance,
                error = %format!("{err:#}"),
                "cluster destroy failed"
            );
        }
        Err(_) => warn!(instance = %instance, ?timeout, "cluster destroy timed out"),
    }

    let _ = events
        .send(OperationEvent::ClusterDestroyed { instance })
        .await;
}

/// Periodic `CheckIsAlive` probe; reads the instance's atomic state off-loop
/// and reports at most one crash.
async fn liveness_watcher(
    inst: Arc<ClusterInstance>,
    backend: Arc<dyn ClusterBackend>,
    interval: Duration,
    events: mpsc::Sender<OperationEvent>,
) {
    use crate::cluster::InstanceState;

    loop {
        tokio::time::sleep(interval).await;

        match inst.state().load() {
            InstanceState::Ready | InstanceState::Busy => {
                if let Err(err) = backend.check_alive(Arc::clone(&inst)).await {
                    warn!(
                        instance = %inst.id(),
                        error = %format!("{err:#}"),
                        "liveness check failed"
                    );
                    let _ = events
                        .send(OperationEvent::ClusterCrashed {
                            instance: inst.id().to_string(),
                            cause: FailCause::Liveness,
                        })
                        .await;
                    return;
                }
            }
            // Re-provisioning window after a recycle; keep watching.
            InstanceState::NotStarted | InstanceState::Starting => {}
            InstanceState::Stopping | InstanceState::Crashed | InstanceState::Destroyed => {
                return;
            }
        }
    }
}
