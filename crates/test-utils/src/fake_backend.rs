use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use skytest::cluster::{BoxFuture, ClusterBackend, ClusterInstance, StartedCluster};

/// A fake cluster backend that:
/// - succeeds (or fails the first `fail_starts` times) without processes
/// - records start/destroy counts
/// - always reports alive.
pub struct FakeClusterBackend {
    config_location: PathBuf,
    fail_starts: usize,
    start_delay: Duration,
    starts: AtomicUsize,
    destroys: AtomicUsize,
}

impl FakeClusterBackend {
    pub fn new(config_location: impl Into<PathBuf>) -> Self {
        Self {
            config_location: config_location.into(),
            fail_starts: 0,
            start_delay: Duration::ZERO,
            starts: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` start calls with a startup error.
    pub fn failing_starts(mut self, n: usize) -> Self {
        self.fail_starts = n;
        self
    }

    /// Delay every start, to let tests observe the `Starting` state.
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

impl ClusterBackend for FakeClusterBackend {
    fn start(&self, _inst: Arc<ClusterInstance>) -> BoxFuture<Result<StartedCluster>> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = attempt <= self.fail_starts;
        let config_location = self.config_location.clone();
        let delay = self.start_delay;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                Err(anyhow!("fake provisioning failure (attempt {attempt})"))
            } else {
                Ok(StartedCluster {
                    config_location,
                    log_file: None,
                })
            }
        })
    }

    fn destroy(&self, _inst: Arc<ClusterInstance>) -> BoxFuture<Result<()>> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn check_alive(&self, _inst: Arc<ClusterInstance>) -> BoxFuture<Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
