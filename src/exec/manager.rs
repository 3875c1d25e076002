// src/exec/manager.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::fs::{self, File};

/// Allocates structured per-instance log files under the run root.
///
/// Layout: `<root>/<instance-id>/<operation>.log`, with a numeric suffix
/// when the same operation repeats (`start.log`, `start-2.log`, ...).
pub struct ExecutionManager {
    root: PathBuf,
    counters: Mutex<HashMap<String, u32>>,
}

impl ExecutionManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a fresh log file for `operation` scoped to the given instance
    /// (or other log owner, e.g. "discovery").
    pub async fn open_log(&self, id: &str, operation: &str) -> Result<(PathBuf, File)> {
        let dir = self.root.join(id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating log directory {:?}", dir))?;

        let path = dir.join(self.unique_name(id, operation));
        let file = File::create(&path)
            .await
            .with_context(|| format!("creating log file {:?}", path))?;

        Ok((path, file))
    }

    fn unique_name(&self, id: &str, operation: &str) -> String {
        let mut counters = self.counters.lock().unwrap();
        let count = counters
            .entry(format!("{id}/{operation}"))
            .and_modify(|c| *c += 1)
            .or_insert(1);
        if *count == 1 {
            format!("{operation}.log")
        } else {
            format!("{operation}-{count}.log")
        }
    }
}
