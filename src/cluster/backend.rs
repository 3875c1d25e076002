// src/cluster/backend.rs

//! Pluggable cluster provisioning backend abstraction.
//!
//! The engine talks to a `ClusterBackend` instead of concrete provider code.
//! This keeps the production shell backend in [`shell`] and lets tests swap
//! in a fake that never spawns processes.
//!
//! Deadlines and cancellation are the caller's concern: the engine wraps
//! every call in its own timeout and cancel channel, so implementations just
//! do the work and must be safe to drop mid-flight.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::cluster::instance::ClusterInstance;
use crate::cluster::shell::ShellClusterBackend;
use crate::config::ProviderConfig;
use crate::errors::{Result, SkytestError};
use crate::exec::ExecutionManager;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Result of a successful cluster start.
#[derive(Debug, Clone)]
pub struct StartedCluster {
    /// Filesystem path usable as a Kubernetes config by tests.
    pub config_location: PathBuf,
    /// Log file of the start operation, if one was written.
    pub log_file: Option<PathBuf>,
}

/// Trait abstracting how clusters are provisioned, destroyed and probed.
///
/// Production code uses [`ShellClusterBackend`]; tests provide their own
/// implementation.
pub trait ClusterBackend: Send + Sync {
    /// Provision the cluster. Success implies the instance can be marked
    /// `Ready` with the returned config location.
    fn start(&self, inst: Arc<ClusterInstance>) -> BoxFuture<anyhow::Result<StartedCluster>>;

    /// Tear the cluster down. Called at most once per provisioned instance.
    fn destroy(&self, inst: Arc<ClusterInstance>) -> BoxFuture<anyhow::Result<()>>;

    /// Cheap liveness probe; an error routes the instance to `Crashed`.
    fn check_alive(&self, inst: Arc<ClusterInstance>) -> BoxFuture<anyhow::Result<()>>;
}

/// Resolve a provider `kind` to a backend implementation.
pub fn backend_for(
    config: &Arc<ProviderConfig>,
    manager: Arc<ExecutionManager>,
) -> Result<Arc<dyn ClusterBackend>> {
    match config.kind.as_str() {
        "shell" => Ok(Arc::new(ShellClusterBackend::new(
            Arc::clone(config),
            manager,
        ))),
        other => Err(SkytestError::Config(format!(
            "provider '{}' has unknown kind '{}'",
            config.name, other
        ))),
    }
}
