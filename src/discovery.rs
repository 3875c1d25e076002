// src/discovery.rs

//! Test discovery.
//!
//! Builds the run's task list from each execution: either the inline
//! `tests` list, or the output of its `discover` script (one test name per
//! line, with `TAGS` and `PACKAGE_ROOT` in the environment).

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::ExecutionConfig;
use crate::errors::Result;
use crate::exec::run_quiet;
use crate::model::TestEntry;

pub async fn discover_tests(executions: &[Arc<ExecutionConfig>]) -> Result<Vec<TestEntry>> {
    let mut entries = Vec::new();

    for (exec_id, execution) in executions.iter().enumerate() {
        let names = if !execution.tests.is_empty() {
            execution.tests.clone()
        } else if let Some(script) = &execution.discover {
            let env = vec![
                ("TAGS".to_string(), execution.tags.join(",")),
                ("PACKAGE_ROOT".to_string(), execution.package_root.clone()),
            ];
            let output = run_quiet(script, &env)
                .await
                .with_context(|| format!("discovery failed for execution '{}'", execution.name))?;
            output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        let mut seen = HashSet::new();
        let before = entries.len();
        for name in names {
            if seen.insert(name.clone()) {
                entries.push(TestEntry::new(exec_id, &execution.name, name));
            } else {
                warn!(execution = %execution.name, test = %name, "duplicate test name; ignoring");
            }
        }

        info!(
            execution = %execution.name,
            tests = entries.len() - before,
            "discovered tests"
        );
    }

    Ok(entries)
}
