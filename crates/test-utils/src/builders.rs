#![allow(dead_code)]

use std::collections::BTreeMap;

use skytest::config::{
    ConfigFile, ExecutionConfig, HarnessSection, ProviderConfig, ReportingSection,
    StatisticsSection,
};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Statistics are disabled by default so tests don't produce ticker noise.
pub struct ConfigFileBuilder {
    config: ConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: ConfigFile {
                harness: HarnessSection::default(),
                reporting: ReportingSection::default(),
                statistics: StatisticsSection {
                    enabled: false,
                    interval: 60,
                },
                health_checks: Vec::new(),
                providers: Vec::new(),
                executions: Vec::new(),
            },
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.config.harness.timeout = seconds;
        self
    }

    pub fn with_root(mut self, root: &str) -> Self {
        self.config.harness.root = root.to_string();
        self
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.config.providers.push(provider);
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.config.executions.push(execution);
        self
    }

    pub fn build(self) -> ConfigFile {
        self.config
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ProviderConfig`.
pub struct ProviderConfigBuilder {
    provider: ProviderConfig,
}

impl ProviderConfigBuilder {
    /// A shell provider with the scripts most tests want: a start that
    /// succeeds and a config script printing a local path.
    pub fn new(name: &str) -> Self {
        let mut scripts = BTreeMap::new();
        scripts.insert("start".to_string(), "echo starting".to_string());
        scripts.insert("config".to_string(), "echo ./kubeconfig".to_string());

        Self {
            provider: ProviderConfig {
                name: name.to_string(),
                kind: "shell".to_string(),
                timeout: 100,
                instances: 1,
                node_count: 1,
                retry_count: 1,
                enabled: None,
                env: vec![],
                env_check: vec![],
                scripts,
            },
        }
    }

    pub fn instances(mut self, count: usize) -> Self {
        self.provider.instances = count;
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.provider.retry_count = count;
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.provider.timeout = seconds;
        self
    }

    pub fn enabled(mut self, val: bool) -> Self {
        self.provider.enabled = Some(val);
        self
    }

    pub fn script(mut self, operation: &str, script: &str) -> Self {
        self.provider
            .scripts
            .insert(operation.to_string(), script.to_string());
        self
    }

    pub fn build(self) -> ProviderConfig {
        self.provider
    }
}

/// Builder for `ExecutionConfig`.
pub struct ExecutionConfigBuilder {
    execution: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            execution: ExecutionConfig {
                name: name.to_string(),
                timeout: 15,
                package_root: ".".to_string(),
                kind: "shell".to_string(),
                tags: vec![],
                clusters: vec![],
                retries: 0,
                tests: vec![],
                discover: None,
                run: "true".to_string(),
                env: vec![],
                on_fail: None,
                enabled: None,
            },
        }
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.execution.timeout = seconds;
        self
    }

    pub fn retries(mut self, count: u32) -> Self {
        self.execution.retries = count;
        self
    }

    pub fn test(mut self, name: &str) -> Self {
        self.execution.tests.push(name.to_string());
        self
    }

    pub fn cluster(mut self, name: &str) -> Self {
        self.execution.clusters.push(name.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.execution.tags.push(tag.to_string());
        self
    }

    pub fn run(mut self, script: &str) -> Self {
        self.execution.run = script.to_string();
        self
    }

    pub fn discover(mut self, script: &str) -> Self {
        self.execution.discover = Some(script.to_string());
        self
    }

    pub fn env(mut self, entry: &str) -> Self {
        self.execution.env.push(entry.to_string());
        self
    }

    pub fn on_fail(mut self, script: &str) -> Self {
        self.execution.on_fail = Some(script.to_string());
        self
    }

    pub fn build(self) -> ExecutionConfig {
        self.execution
    }
}
