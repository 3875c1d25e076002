// src/exec/command.rs

//! Line-by-line shell script runner used for provider lifecycle operations.
//!
//! Scripts are multi-line strings; each non-blank line is executed as its
//! own `sh -c` command. Output goes to a log file allocated by the
//! [`ExecutionManager`]; values of secret environment variables are masked
//! before anything reaches a log.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::exec::manager::ExecutionManager;

/// Shell command runner bound to one log owner (usually a cluster instance).
pub struct ShellRunner {
    manager: Arc<ExecutionManager>,
    id: String,
    /// Extra `KEY=VALUE` environment for every command.
    env: Vec<(String, String)>,
    /// `$(var)` substitutions applied to every command line.
    args: Vec<(String, String)>,
    /// Secret values replaced by `****` in logs.
    mask: Vec<String>,
}

impl ShellRunner {
    pub fn new(
        manager: Arc<ExecutionManager>,
        id: impl Into<String>,
        env: Vec<(String, String)>,
        args: Vec<(String, String)>,
        mask: Vec<String>,
    ) -> Self {
        Self {
            manager,
            id: id.into(),
            env,
            args,
            mask,
        }
    }

    /// Run a script for its side effects; returns the log file path.
    pub async fn run_cmd(&self, operation: &str, script: &str) -> Result<std::path::PathBuf> {
        let (log_file, _) = self.run_script(operation, script, false).await?;
        Ok(log_file)
    }

    /// Run a script and return its accumulated stdout (also logged).
    pub async fn run_read(&self, operation: &str, script: &str) -> Result<String> {
        let (_, output) = self.run_script(operation, script, true).await?;
        Ok(output)
    }

    async fn run_script(
        &self,
        operation: &str,
        script: &str,
        capture: bool,
    ) -> Result<(std::path::PathBuf, String)> {
        let (log_path, mut log) = self
            .manager
            .open_log(&self.id, operation)
            .await
            .with_context(|| format!("opening {operation} log for {}", self.id))?;

        let mut output = String::new();

        for line in split_script(script) {
            let cmd = interpolate(line, &self.args);
            info!(operation, id = %self.id, cmd = %mask_secrets(&cmd, &self.mask), "running");

            log.write_all(
                format!("{operation}: {}\n", mask_secrets(&cmd, &self.mask)).as_bytes(),
            )
            .await?;

            let stdout = self
                .run_line(&cmd, operation, &mut log, capture)
                .await
                .with_context(|| format!("{operation} command failed for {}", self.id))?;
            output.push_str(&stdout);
        }

        log.flush().await?;
        Ok((log_path, output))
    }

    async fn run_line(
        &self,
        cmd: &str,
        operation: &str,
        log: &mut tokio::fs::File,
        capture: bool,
    ) -> Result<String> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning {operation} command"))?;

        let mut captured = String::new();

        // Drain both streams into the log; stdout is optionally accumulated
        // for run_read callers.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // stderr gets its own cloned log handle so stdout and stderr writes
        // don't interleave mid-line.
        let stderr_task = match stderr {
            Some(stderr) => {
                let mut file = log.try_clone().await.ok();
                let mask = self.mask.clone();
                let operation = operation.to_string();
                let id = self.id.clone();
                Some(tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let line = mask_secrets(&line, &mask);
                        debug!(operation = %operation, id = %id, "stderr: {}", line);
                        if let Some(f) = file.as_mut() {
                            let _ = f.write_all(format!("{line}\n").as_bytes()).await;
                        }
                    }
                }))
            }
            None => None,
        };

        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let masked = mask_secrets(&line, &self.mask);
                log.write_all(format!("{masked}\n").as_bytes()).await?;
                if capture {
                    captured.push_str(&line);
                    captured.push('\n');
                }
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for {operation} command"))?;

        if let Some(handle) = stderr_task {
            let _ = handle.await;
        }

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            log.write_all(format!("command exited with code {code}\n").as_bytes())
                .await?;
            return Err(anyhow!("{operation} command exited with code {code}"));
        }

        Ok(captured)
    }
}

/// Non-blank lines of a script, in order.
pub fn split_script(script: &str) -> Vec<&str> {
    script
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Replace `$(var)` placeholders with their values from `args`.
/// Unknown placeholders are left untouched.
pub fn interpolate(cmd: &str, args: &[(String, String)]) -> String {
    let re = Regex::new(r"\$\(([A-Za-z0-9_-]+)\)").unwrap();
    re.replace_all(cmd, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        args.iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Replace each secret value occurring in `line` with `****`.
pub fn mask_secrets(line: &str, secrets: &[String]) -> String {
    let mut masked = line.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            masked = masked.replace(secret.as_str(), "****");
        }
    }
    masked
}

/// Parse `KEY=VALUE` entries, skipping malformed ones with a debug log.
pub fn parse_env_entries(entries: &[String]) -> Vec<(String, String)> {
    let mut parsed = Vec::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                parsed.push((key.trim().to_string(), value.to_string()));
            }
            _ => debug!(entry = %entry, "skipping malformed env entry"),
        }
    }
    parsed
}

/// Run a script's lines without a log file, returning accumulated stdout.
/// Used for discovery scripts and health probes.
pub async fn run_quiet(script: &str, envs: &[(String, String)]) -> Result<String> {
    let mut output = String::new();

    for line in split_script(script) {
        let mut command = Command::new("sh");
        command.arg("-c").arg(line);
        for (key, value) in envs {
            command.env(key, value);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);

        let result = command
            .output()
            .await
            .with_context(|| format!("spawning command '{line}'"))?;

        if !result.status.success() {
            return Err(anyhow!(
                "command '{line}' exited with code {}",
                result.status.code().unwrap_or(-1)
            ));
        }
        output.push_str(&String::from_utf8_lossy(&result.stdout));
    }

    Ok(output)
}
