// src/cluster/mod.rs

//! Cluster instances, per-provider pools and provisioning backends.
//!
//! - [`state`] holds the instance state machine and its atomic cell.
//! - [`instance`] is the shared per-cluster record handed to workers.
//! - [`group`] is the per-provider pool with its crash budget.
//! - [`backend`] defines the `ClusterBackend` trait the engine consumes and
//!   the factory that resolves a provider `kind` to an implementation.
//! - [`shell`] is the script-driven production backend.

pub mod backend;
pub mod group;
pub mod instance;
pub mod shell;
pub mod state;

pub use backend::{backend_for, BoxFuture, ClusterBackend, StartedCluster};
pub use group::ClusterGroup;
pub use instance::ClusterInstance;
pub use shell::ShellClusterBackend;
pub use state::{InstanceState, StateCell};
