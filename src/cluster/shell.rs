// src/cluster/shell.rs

//! Script-driven cluster backend.
//!
//! A `shell` provider describes its whole lifecycle as scripts: `install`,
//! `start`, `config`, `prepare`, `check`, `stop`, `cleanup`. Each operation
//! runs line by line through the [`ShellRunner`] and logs into the
//! instance's directory. The `config` script prints the kubeconfig path on
//! stdout; without one, the `KUBECONFIG` environment variable is used.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::cluster::backend::{BoxFuture, ClusterBackend, StartedCluster};
use crate::cluster::instance::ClusterInstance;
use crate::config::ProviderConfig;
use crate::exec::command::parse_env_entries;
use crate::exec::{ExecutionManager, ShellRunner};

pub struct ShellClusterBackend {
    config: Arc<ProviderConfig>,
    manager: Arc<ExecutionManager>,
}

impl ShellClusterBackend {
    pub fn new(config: Arc<ProviderConfig>, manager: Arc<ExecutionManager>) -> Self {
        Self { config, manager }
    }

    fn runner(&self, inst: &ClusterInstance) -> ShellRunner {
        let args = vec![
            ("cluster-name".to_string(), inst.id().to_string()),
            (
                "instance-root".to_string(),
                inst.root().display().to_string(),
            ),
            (
                "node-count".to_string(),
                self.config.node_count.to_string(),
            ),
        ];
        let mask = self
            .config
            .env_check
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .collect();

        ShellRunner::new(
            Arc::clone(&self.manager),
            inst.id(),
            parse_env_entries(&self.config.env),
            args,
            mask,
        )
    }

    async fn start_inner(
        config: Arc<ProviderConfig>,
        runner: ShellRunner,
        inst: Arc<ClusterInstance>,
    ) -> Result<StartedCluster> {
        if let Some(script) = config.script("install") {
            runner.run_cmd("install", script).await?;
        }

        let log_file = runner
            .run_cmd("start", config.script("start").unwrap_or_default())
            .await?;

        let config_location = match config.script("config") {
            Some(script) => {
                let output = runner.run_read("config", script).await?;
                let path = output.trim();
                if path.is_empty() {
                    return Err(anyhow!(
                        "config script of provider '{}' printed no path",
                        config.name
                    ));
                }
                PathBuf::from(path)
            }
            None => std::env::var_os("KUBECONFIG")
                .map(PathBuf::from)
                .with_context(|| {
                    format!(
                        "provider '{}' has no config script and KUBECONFIG is unset",
                        config.name
                    )
                })?,
        };

        if let Some(script) = config.script("prepare") {
            runner.run_cmd("prepare", script).await?;
        }

        info!(
            instance = %inst.id(),
            config = %config_location.display(),
            "cluster started"
        );

        Ok(StartedCluster {
            config_location,
            log_file: Some(log_file),
        })
    }
}

impl ClusterBackend for ShellClusterBackend {
    fn start(&self, inst: Arc<ClusterInstance>) -> BoxFuture<Result<StartedCluster>> {
        let config = Arc::clone(&self.config);
        let runner = self.runner(&inst);
        Box::pin(Self::start_inner(config, runner, inst))
    }

    fn destroy(&self, inst: Arc<ClusterInstance>) -> BoxFuture<Result<()>> {
        let config = Arc::clone(&self.config);
        let runner = self.runner(&inst);
        Box::pin(async move {
            if let Some(script) = config.script("stop") {
                runner.run_cmd("stop", script).await?;
            }
            if let Some(script) = config.script("cleanup") {
                // Cleanup failures shouldn't hide a successful stop.
                if let Err(err) = runner.run_cmd("cleanup", script).await {
                    debug!(instance = %inst.id(), error = %format!("{err:#}"), "cleanup script failed");
                }
            }
            info!(instance = %inst.id(), "cluster destroyed");
            Ok(())
        })
    }

    fn check_alive(&self, inst: Arc<ClusterInstance>) -> BoxFuture<Result<()>> {
        let config = Arc::clone(&self.config);
        let runner = self.runner(&inst);
        Box::pin(async move {
            match config.script("check") {
                Some(script) => runner
                    .run_cmd("check", script)
                    .await
                    .map(|_| ())
                    .context("liveness check failed"),
                None => Ok(()),
            }
        })
    }
}
