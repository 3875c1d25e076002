// src/lib.rs

pub mod cli;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::cluster::{backend_for, ClusterGroup};
use crate::config::loader::load_and_validate;
use crate::config::{ConfigFile, ExecutionConfig};
use crate::engine::{health, CoreEngine, OperationEvent, Runtime, RuntimeOptions};
use crate::errors::{Result, SkytestError};
use crate::exec::{ExecutionManager, ShellTestExecutor};
use crate::model::RunVerdict;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI filters
/// - test discovery
/// - cluster groups (instances start lazily on scheduler demand)
/// - the engine runtime with its signal and health-check watchers
/// - report emission
pub async fn run(args: CliArgs) -> Result<RunVerdict> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)?;

    apply_arguments(&mut cfg, &args)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(RunVerdict::Passed);
    }

    let root = PathBuf::from(&cfg.harness.root);
    std::fs::create_dir_all(&root)?;
    let manager = Arc::new(ExecutionManager::new(root.clone()));

    // Discovery: tag filters are applied by the execution's own discover
    // script; the engine only sees the resulting entries.
    let executions: Vec<Arc<ExecutionConfig>> =
        cfg.executions.iter().cloned().map(Arc::new).collect();
    let tasks = discovery::discover_tests(&executions).await?;
    if tasks.is_empty() {
        warn!("no tests discovered; nothing to do");
        return Ok(RunVerdict::NoTests);
    }
    info!(tests = tasks.len(), providers = cfg.providers.len(), "run plan ready");

    // Cluster groups in config order; pools fill lazily on demand.
    let mut groups = Vec::new();
    let mut desired_total = 0;
    for (id, provider) in cfg.providers.iter().enumerate() {
        let provider = Arc::new(provider.clone());
        let backend = backend_for(&provider, Arc::clone(&manager))?;
        let desired = match args.count {
            Some(cap) => provider.instances.min(cap.max(1)),
            None => provider.instances,
        };
        desired_total += desired;
        groups.push(ClusterGroup::new(id, provider, backend, desired, root.clone()));
    }

    // Producers never block the loop in practice: the buffer covers one
    // event per instance or per task, whichever is larger.
    let buffer = desired_total.max(tasks.len()).max(1);
    let (ops_tx, ops_rx) = mpsc::channel::<OperationEvent>(buffer);
    let (term_tx, term_rx) = mpsc::channel::<String>(cfg.health_checks.len() + 2);

    spawn_signal_watcher(term_tx.clone());
    health::spawn_health_checks(&cfg.health_checks, term_tx);

    let core = CoreEngine::new(executions, tasks, groups);
    let options = RuntimeOptions {
        global_timeout: Duration::from_secs(cfg.harness.timeout),
        stats_interval: cfg
            .statistics
            .enabled
            .then(|| Duration::from_secs(cfg.statistics.interval.max(1))),
        ..RuntimeOptions::default()
    };
    let executor = ShellTestExecutor::new(ops_tx.clone(), Arc::clone(&manager));

    let runtime = Runtime::new(core, options, ops_rx, ops_tx, term_rx, executor);
    let core = runtime.run().await?;

    let report_path = root.join(&cfg.reporting.junit_report);
    report::write_report(&report_path, core.executions(), core.tasks())?;

    let verdict = core.verdict();
    info!(?verdict, "run finished");
    Ok(verdict)
}

/// Apply CLI filters to the loaded config: provider selection, enabled
/// flags. Pool caps (`--count`) are applied when groups are built.
fn apply_arguments(cfg: &mut ConfigFile, args: &CliArgs) -> Result<()> {
    for name in &args.clusters {
        if !cfg.providers.iter().any(|p| &p.name == name) {
            return Err(SkytestError::Config(format!(
                "--cluster names unknown provider '{name}'"
            )));
        }
    }

    cfg.providers.retain(|p| {
        (args.clusters.is_empty() || args.clusters.contains(&p.name))
            && p.effective_enabled(args.only_enabled)
    });
    cfg.executions
        .retain(|e| e.effective_enabled(args.only_enabled));

    if cfg.providers.is_empty() {
        return Err(SkytestError::Config(
            "no providers left after applying --cluster/--only-enabled".to_string(),
        ));
    }

    Ok(())
}

/// Forward SIGINT/SIGTERM to the engine's termination channel.
fn spawn_signal_watcher(term_tx: mpsc::Sender<String>) {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        let _ = term_tx.send(format!("received {signal}")).await;
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

/// Simple dry-run output: print providers, pools and executions.
fn print_dry_run(cfg: &ConfigFile) {
    println!("skytest dry-run");
    println!("  harness.timeout = {}s", cfg.harness.timeout);
    println!("  harness.root = {}", cfg.harness.root);
    println!();

    println!("providers ({}):", cfg.providers.len());
    for provider in &cfg.providers {
        println!("  - {} (kind: {})", provider.name, provider.kind);
        println!("      instances: {}", provider.instances);
        println!("      retry_count: {}", provider.retry_count);
        println!("      timeout: {}s", provider.timeout);
        if !provider.env_check.is_empty() {
            println!("      env_check: {:?}", provider.env_check);
        }
    }
    println!();

    println!("executions ({}):", cfg.executions.len());
    for execution in &cfg.executions {
        println!("  - {}", execution.name);
        println!("      timeout: {}s", execution.timeout);
        println!("      retries: {}", execution.retries);
        if !execution.clusters.is_empty() {
            println!("      clusters: {:?}", execution.clusters);
        }
        if !execution.tags.is_empty() {
            println!("      tags: {:?}", execution.tags);
        }
        if !execution.tests.is_empty() {
            println!("      tests: {:?}", execution.tests);
        } else if execution.discover.is_some() {
            println!("      tests: (via discover script)");
        }
    }
}
