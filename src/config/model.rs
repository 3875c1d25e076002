// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [harness]
/// timeout = 7200
/// root = ".skytest"
///
/// [[provider]]
/// name = "gke"
/// kind = "shell"
/// [provider.scripts]
/// start = "..."
///
/// [[execution]]
/// name = "basic"
/// run = "./run-one.sh"
/// tests = ["TestOne"]
/// ```
///
/// All sections are optional and have reasonable defaults, except that a
/// runnable config needs at least one provider and one execution (enforced
/// by `validate`).
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// Global run parameters from `[harness]`.
    #[serde(default)]
    pub harness: HarnessSection,

    /// Report output from `[reporting]`.
    #[serde(default)]
    pub reporting: ReportingSection,

    /// Stats-ticker behaviour from `[statistics]`.
    #[serde(default)]
    pub statistics: StatisticsSection,

    /// Long-running external probes from `[[health_check]]`.
    #[serde(default, rename = "health_check")]
    pub health_checks: Vec<HealthCheckConfig>,

    /// Cluster providers from `[[provider]]`, in declaration order.
    ///
    /// Declaration order is load-bearing: the scheduler breaks ties between
    /// candidate groups by config position.
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderConfig>,

    /// Test executions from `[[execution]]`, in declaration order.
    #[serde(default, rename = "execution")]
    pub executions: Vec<ExecutionConfig>,
}

/// `[harness]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessSection {
    /// Wall-clock budget for the entire run, in seconds.
    #[serde(default = "default_global_timeout")]
    pub timeout: u64,

    /// Directory under which all per-run state (instance logs, artifacts,
    /// the report) is written.
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_global_timeout() -> u64 {
    7200
}

fn default_root() -> String {
    ".skytest".to_string()
}

impl Default for HarnessSection {
    fn default() -> Self {
        Self {
            timeout: default_global_timeout(),
            root: default_root(),
        }
    }
}

/// `[reporting]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportingSection {
    /// Path of the JUnit report, relative to the harness root.
    #[serde(default = "default_junit_report")]
    pub junit_report: String,
}

fn default_junit_report() -> String {
    "junit.xml".to_string()
}

impl Default for ReportingSection {
    fn default() -> Self {
        Self {
            junit_report: default_junit_report(),
        }
    }
}

/// `[statistics]` section.
///
/// Controls the periodic queue/cluster census log lines.
#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between stats log lines.
    #[serde(default = "default_stats_interval")]
    pub interval: u64,
}

fn default_true() -> bool {
    true
}

fn default_stats_interval() -> u64 {
    60
}

impl Default for StatisticsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_stats_interval(),
        }
    }
}

/// `[[health_check]]` section.
///
/// Each entry is an independent watcher: every `interval` seconds it runs
/// `run`; the first failure sends `message` to the engine, which begins a
/// graceful shutdown.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Seconds between probe invocations (also the probe deadline).
    #[serde(default = "default_health_interval")]
    pub interval: u64,

    /// Probe script; each non-blank line is one `sh -c` command.
    pub run: String,

    /// Message reported to the engine when the probe fails.
    #[serde(default)]
    pub message: String,
}

fn default_health_interval() -> u64 {
    30
}

/// `[[provider]]` section: one cluster provisioning backend and its pool.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name; instance IDs are `<name>-<ordinal>`.
    pub name: String,

    /// Provider kind. Currently only `"shell"` is built in.
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Cluster start deadline, in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout: u64,

    /// Desired pool size (may be capped by `--count`).
    #[serde(default = "default_one")]
    pub instances: usize,

    /// Node count requested from the backend, exposed to scripts as
    /// `$(node-count)`.
    #[serde(default = "default_one")]
    pub node_count: usize,

    /// Pool-wide crash budget. Every cluster crash decrements it; at zero
    /// the group is unhealthy and stops receiving work.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// If `None`, the provider participates by default; `--only-enabled`
    /// requires an explicit `true`.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Extra `KEY=VALUE` environment entries for every script run.
    #[serde(default)]
    pub env: Vec<String>,

    /// Environment variables that must be present before the run starts.
    /// Their values are masked in all logs.
    #[serde(default)]
    pub env_check: Vec<String>,

    /// Lifecycle scripts keyed by operation:
    /// `install`, `start`, `config`, `prepare`, `check`, `stop`, `cleanup`.
    /// Only `start` is required for kind `shell`.
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

fn default_kind() -> String {
    "shell".to_string()
}

fn default_provider_timeout() -> u64 {
    900
}

fn default_one() -> usize {
    1
}

fn default_retry_count() -> u32 {
    1
}

impl ProviderConfig {
    pub fn effective_enabled(&self, only_enabled: bool) -> bool {
        if only_enabled {
            self.enabled == Some(true)
        } else {
            self.enabled.unwrap_or(true)
        }
    }

    pub fn script(&self, operation: &str) -> Option<&str> {
        self.scripts.get(operation).map(|s| s.as_str())
    }
}

/// `[[execution]]` section: a group of tests sharing parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Execution (suite) name; test keys are `<name>/<test>`.
    pub name: String,

    /// Per-test deadline, in seconds.
    #[serde(default = "default_execution_timeout")]
    pub timeout: u64,

    /// Root of the test sources; exposed to scripts as `PACKAGE_ROOT`.
    #[serde(default = "default_package_root")]
    pub package_root: String,

    /// Invocation contract. Currently only `"shell"` is built in.
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Tag filters, forwarded to discovery and test runs as `TAGS`.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Providers eligible to host these tests. Empty = any provider.
    #[serde(default)]
    pub clusters: Vec<String>,

    /// Maximum reruns after a test-attributable failure. A test therefore
    /// runs at most `retries + 1` times.
    #[serde(default)]
    pub retries: u32,

    /// Inline test list. Takes precedence over `discover`.
    #[serde(default)]
    pub tests: Vec<String>,

    /// Discovery script printing one test name per line on stdout.
    #[serde(default)]
    pub discover: Option<String>,

    /// Script invoked once per test; see the shell execution contract for
    /// the environment it receives.
    #[serde(default)]
    pub run: String,

    /// Extra `KEY=VALUE` environment entries for every test run.
    #[serde(default)]
    pub env: Vec<String>,

    /// Best-effort script run after a failed or timed-out attempt, with the
    /// same environment as the test itself.
    #[serde(default)]
    pub on_fail: Option<String>,

    /// Same semantics as `ProviderConfig::enabled`.
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn default_execution_timeout() -> u64 {
    600
}

fn default_package_root() -> String {
    ".".to_string()
}

impl ExecutionConfig {
    pub fn effective_enabled(&self, only_enabled: bool) -> bool {
        if only_enabled {
            self.enabled == Some(true)
        } else {
            self.enabled.unwrap_or(true)
        }
    }
}
