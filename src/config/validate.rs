// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::ConfigFile;
use crate::errors::{Result, SkytestError};

/// Run semantic validation against a loaded configuration.
///
/// This checks:
/// - there is at least one provider and one execution
/// - provider names are unique and kinds are known
/// - pool sizes, timeouts and the global timeout are positive
/// - kind `shell` providers carry a `start` script
/// - every `env_check` variable is present in the environment
/// - every execution `clusters` selector names an existing provider
/// - executions of kind `shell` have a `run` script and either an inline
///   test list or a `discover` script
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    if cfg.harness.timeout == 0 {
        return Err(config_err("[harness].timeout must be >= 1 (got 0)"));
    }

    validate_providers(cfg)?;
    validate_executions(cfg)?;
    validate_health_checks(cfg)?;
    Ok(())
}

fn validate_providers(cfg: &ConfigFile) -> Result<()> {
    if cfg.providers.is_empty() {
        return Err(config_err(
            "config must contain at least one [[provider]] section",
        ));
    }

    let mut seen = HashSet::new();
    for provider in &cfg.providers {
        if provider.name.trim().is_empty() {
            return Err(config_err("provider name must not be empty"));
        }
        if !seen.insert(provider.name.as_str()) {
            return Err(config_err(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        if provider.kind != "shell" {
            return Err(config_err(format!(
                "provider '{}' has unknown kind '{}' (expected \"shell\")",
                provider.name, provider.kind
            )));
        }
        if provider.instances == 0 {
            return Err(config_err(format!(
                "provider '{}' must have instances >= 1",
                provider.name
            )));
        }
        if provider.timeout == 0 {
            return Err(config_err(format!(
                "provider '{}' must have timeout >= 1",
                provider.name
            )));
        }
        if provider.script("start").is_none() {
            return Err(config_err(format!(
                "provider '{}' (kind shell) requires a scripts.start entry",
                provider.name
            )));
        }
        for var in &provider.env_check {
            if std::env::var_os(var).is_none() {
                return Err(config_err(format!(
                    "provider '{}' requires environment variable '{}'",
                    provider.name, var
                )));
            }
        }
    }

    Ok(())
}

fn validate_executions(cfg: &ConfigFile) -> Result<()> {
    if cfg.executions.is_empty() {
        return Err(config_err(
            "config must contain at least one [[execution]] section",
        ));
    }

    let provider_names: HashSet<&str> =
        cfg.providers.iter().map(|p| p.name.as_str()).collect();

    let mut seen = HashSet::new();
    for execution in &cfg.executions {
        if execution.name.trim().is_empty() {
            return Err(config_err("execution name must not be empty"));
        }
        if !seen.insert(execution.name.as_str()) {
            return Err(config_err(format!(
                "duplicate execution name '{}'",
                execution.name
            )));
        }
        if execution.kind != "shell" {
            return Err(config_err(format!(
                "execution '{}' has unknown kind '{}' (expected \"shell\")",
                execution.name, execution.kind
            )));
        }
        if execution.timeout == 0 {
            return Err(config_err(format!(
                "execution '{}' must have timeout >= 1",
                execution.name
            )));
        }
        if execution.run.trim().is_empty() {
            return Err(config_err(format!(
                "execution '{}' (kind shell) requires a run script",
                execution.name
            )));
        }
        if execution.tests.is_empty() && execution.discover.is_none() {
            return Err(config_err(format!(
                "execution '{}' needs either a tests list or a discover script",
                execution.name
            )));
        }
        for selector in &execution.clusters {
            if !provider_names.contains(selector.as_str()) {
                return Err(config_err(format!(
                    "execution '{}' selects unknown provider '{}'",
                    execution.name, selector
                )));
            }
        }
    }

    Ok(())
}

fn validate_health_checks(cfg: &ConfigFile) -> Result<()> {
    for check in &cfg.health_checks {
        if check.interval == 0 {
            return Err(config_err("health_check interval must be >= 1 (got 0)"));
        }
        if check.run.trim().is_empty() {
            return Err(config_err("health_check run script must not be empty"));
        }
    }
    Ok(())
}

fn config_err(msg: impl Into<String>) -> SkytestError {
    SkytestError::Config(msg.into())
}
