// src/cluster/instance.rs

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::warn;

use crate::cluster::state::{InstanceState, StateCell};
use crate::model::GroupId;

/// One provisioned cluster.
///
/// Shared (via `Arc`) between the engine core and its workers. The core owns
/// every transition; workers only read. `config_location` is write-once: it
/// is published when the instance first becomes `Ready` and providers must
/// produce stable paths, so a recycled instance re-publishing the same path
/// is a no-op.
pub struct ClusterInstance {
    id: String,
    group: GroupId,
    ordinal: usize,
    state: StateCell,
    config_location: OnceLock<PathBuf>,
    root: PathBuf,
}

impl ClusterInstance {
    /// `ordinal` is 1-based; the ID becomes `<provider-name>-<ordinal>`.
    pub fn new(provider_name: &str, ordinal: usize, group: GroupId, run_root: &Path) -> Self {
        let id = format!("{provider_name}-{ordinal}");
        let root = run_root.join(&id);
        Self {
            id,
            group,
            ordinal,
            state: StateCell::new(InstanceState::NotStarted),
            config_location: OnceLock::new(),
            root,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }

    /// Directory scoped to this instance for logs and artifacts.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Kubernetes config path; `None` until the instance has been `Ready`
    /// at least once.
    pub fn config_location(&self) -> Option<&Path> {
        self.config_location.get().map(|p| p.as_path())
    }

    /// Publish the config location. Read-only after first assignment; a
    /// differing path from a re-provision is ignored with a warning.
    pub fn publish_config_location(&self, path: PathBuf) {
        let published = self.config_location.get_or_init(|| path.clone());
        if *published != path {
            warn!(
                instance = %self.id,
                published = %published.display(),
                ignored = %path.display(),
                "provider produced an unstable config location; keeping the first one"
            );
        }
    }
}

impl std::fmt::Debug for ClusterInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterInstance")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
