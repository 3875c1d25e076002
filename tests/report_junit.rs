// tests/report_junit.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::init_tracing;
use skytest::config::ExecutionConfig;
use skytest::model::{FailCause, TestEntry, TestStatus};
use skytest::report;
use skytest_test_utils::ExecutionConfigBuilder;

fn entry(
    execution: usize,
    exec_name: &str,
    name: &str,
    status: TestStatus,
    cause: Option<FailCause>,
) -> TestEntry {
    let mut entry = TestEntry::new(execution, exec_name, name);
    entry.status = status;
    entry.cause = cause;
    entry.attempts = 1;
    entry.duration = Duration::from_millis(1500);
    entry
}

fn executions() -> Vec<Arc<ExecutionConfig>> {
    vec![Arc::new(ExecutionConfigBuilder::new("suite").build())]
}

#[test]
fn report_counts_and_structure() {
    init_tracing();

    let tasks = vec![
        entry(0, "suite", "TestPass", TestStatus::Success, None),
        entry(0, "suite", "TestFail", TestStatus::Failed, None),
        entry(
            0,
            "suite",
            "TestSkip",
            TestStatus::Skipped,
            Some(FailCause::GlobalTimeout),
        ),
    ];

    let xml = report::render(&executions(), &tasks);

    assert!(xml.starts_with("<?xml version=\"1.0\""));
    assert!(xml.contains("<testsuites tests=\"3\" failures=\"1\" skipped=\"1\""));
    assert!(xml.contains("<testsuite name=\"suite\" tests=\"3\" failures=\"1\" skipped=\"1\""));
    assert!(xml.contains("name=\"suite/TestFail\""));
    assert!(xml.contains("<skipped message=\"global-timeout\"/>"));
    assert!(xml.contains("<property name=\"attempts\" value=\"1\"/>"));
}

#[test]
fn report_cases_are_in_stable_key_order() {
    init_tracing();

    let tasks = vec![
        entry(0, "suite", "TestZ", TestStatus::Success, None),
        entry(0, "suite", "TestA", TestStatus::Success, None),
    ];

    let xml = report::render(&executions(), &tasks);

    let a = xml.find("suite/TestA").unwrap();
    let z = xml.find("suite/TestZ").unwrap();
    assert!(a < z, "cases must be sorted by key");
}

#[test]
fn report_escapes_xml_metacharacters() {
    init_tracing();

    let mut bad = entry(0, "suite", "Test<&>", TestStatus::Failed, None);
    bad.message = Some("expected \"a\" & got 'b'".to_string());
    let xml = report::render(&executions(), &[bad]);

    assert!(xml.contains("suite/Test&lt;&amp;&gt;"));
    assert!(xml.contains("expected &quot;a&quot; &amp; got &apos;b&apos;"));
    assert!(!xml.contains("Test<&>"));
}

#[test]
fn report_writes_to_disk() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("out").join("junit.xml");

    let tasks = vec![entry(0, "suite", "TestPass", TestStatus::Success, None)];
    report::write_report(&path, &executions(), &tasks).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("TestPass"));
}
