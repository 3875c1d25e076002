// tests/config_behaviour.rs

mod common;

use common::init_tracing;
use skytest::config::{load_and_validate, validate_config, ConfigFile};
use skytest::errors::SkytestError;
use skytest_test_utils::{ConfigFileBuilder, ExecutionConfigBuilder, ProviderConfigBuilder};

fn parse(toml_text: &str) -> ConfigFile {
    toml::from_str(toml_text).expect("config should deserialize")
}

const VALID: &str = r#"
[harness]
timeout = 300
root = ".skytest-test"

[[provider]]
name = "alpha"
instances = 2
retry_count = 2

[provider.scripts]
start = "echo starting"
config = "echo ./kubeconfig"

[[execution]]
name = "basic"
timeout = 60
tests = ["TestOne", "TestTwo"]
run = "echo run $TEST_NAME"
clusters = ["alpha"]
"#;

#[test]
fn valid_config_parses_and_validates() {
    init_tracing();
    let cfg = parse(VALID);
    validate_config(&cfg).expect("config should validate");

    assert_eq!(cfg.harness.timeout, 300);
    assert_eq!(cfg.providers.len(), 1);
    assert_eq!(cfg.providers[0].kind, "shell");
    assert_eq!(cfg.providers[0].instances, 2);
    assert_eq!(cfg.executions[0].tests, vec!["TestOne", "TestTwo"]);
    assert_eq!(cfg.executions[0].retries, 0);
}

#[test]
fn defaults_are_applied() {
    init_tracing();
    let cfg = parse(
        r#"
[[provider]]
name = "alpha"
[provider.scripts]
start = "echo ok"

[[execution]]
name = "basic"
tests = ["T"]
run = "true"
"#,
    );
    validate_config(&cfg).expect("config should validate");

    assert_eq!(cfg.harness.timeout, 7200);
    assert_eq!(cfg.harness.root, ".skytest");
    assert_eq!(cfg.reporting.junit_report, "junit.xml");
    assert!(cfg.statistics.enabled);
    assert_eq!(cfg.providers[0].retry_count, 1);
    assert_eq!(cfg.executions[0].timeout, 600);
}

#[test]
fn unknown_cluster_selector_is_rejected() {
    init_tracing();
    let mut cfg = parse(VALID);
    cfg.executions[0].clusters = vec!["missing".to_string()];

    let err = validate_config(&cfg).unwrap_err();
    assert!(matches!(err, SkytestError::Config(_)));
    assert!(err.to_string().contains("unknown provider 'missing'"));
}

#[test]
fn provider_without_start_script_is_rejected() {
    init_tracing();
    let mut cfg = parse(VALID);
    cfg.providers[0].scripts.remove("start");

    let err = validate_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("scripts.start"));
}

#[test]
fn execution_without_tests_or_discovery_is_rejected() {
    init_tracing();
    let mut cfg = parse(VALID);
    cfg.executions[0].tests.clear();
    cfg.executions[0].discover = None;

    let err = validate_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("tests list or a discover script"));
}

#[test]
fn zero_global_timeout_is_rejected() {
    init_tracing();
    let mut cfg = parse(VALID);
    cfg.harness.timeout = 0;

    assert!(validate_config(&cfg).is_err());
}

#[test]
fn duplicate_provider_names_are_rejected() {
    init_tracing();
    let mut cfg = parse(VALID);
    let clone = cfg.providers[0].clone();
    cfg.providers.push(clone);

    let err = validate_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("duplicate provider name"));
}

#[test]
fn load_and_validate_reads_from_disk() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("Skytest.toml");
    std::fs::write(&path, VALID).unwrap();

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.providers[0].name, "alpha");

    let missing = load_and_validate(tmp.path().join("nope.toml"));
    assert!(matches!(missing.unwrap_err(), SkytestError::Config(_)));
}

#[test]
fn builder_configs_pass_validation() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_timeout(120)
        .with_provider(ProviderConfigBuilder::new("alpha").instances(2).build())
        .with_execution(
            ExecutionConfigBuilder::new("suite")
                .test("TestOne")
                .cluster("alpha")
                .build(),
        )
        .build();

    validate_config(&cfg).expect("builder config should validate");
    assert!(!cfg.statistics.enabled, "test configs keep the ticker quiet");
}

#[test]
fn enabled_flags_interact_with_only_enabled() {
    init_tracing();
    let cfg = parse(VALID);
    let provider = &cfg.providers[0];

    // Unset `enabled` participates by default, but not under --only-enabled.
    assert!(provider.effective_enabled(false));
    assert!(!provider.effective_enabled(true));

    let mut explicit = provider.clone();
    explicit.enabled = Some(true);
    assert!(explicit.effective_enabled(true));

    let mut disabled = provider.clone();
    disabled.enabled = Some(false);
    assert!(!disabled.effective_enabled(false));
}
