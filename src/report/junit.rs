// src/report/junit.rs

//! JUnit-style report emission.
//!
//! One `<testsuite>` per execution, one `<testcase>` per test key, in
//! stable key order. Attempts, the cause string and the artifact directory
//! travel as case properties so CI systems that ignore them still render
//! the pass/fail structure.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::ExecutionConfig;
use crate::errors::Result;
use crate::model::{TestEntry, TestStatus};

/// Render the report document for the given final task list.
pub fn render(executions: &[Arc<ExecutionConfig>], tasks: &[TestEntry]) -> String {
    let total = tasks.len();
    let failures = tasks
        .iter()
        .filter(|t| matches!(t.status, TestStatus::Failed | TestStatus::Timeout))
        .count();
    let skipped = tasks
        .iter()
        .filter(|t| t.status == TestStatus::Skipped)
        .count();
    let time: f64 = tasks.iter().map(|t| t.duration.as_secs_f64()).sum();

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<testsuites tests=\"{total}\" failures=\"{failures}\" skipped=\"{skipped}\" time=\"{time:.3}\">"
    );

    for (exec_id, execution) in executions.iter().enumerate() {
        let mut cases: Vec<&TestEntry> =
            tasks.iter().filter(|t| t.execution == exec_id).collect();
        if cases.is_empty() {
            continue;
        }
        cases.sort_by(|a, b| a.key.cmp(&b.key));

        let suite_failures = cases
            .iter()
            .filter(|t| matches!(t.status, TestStatus::Failed | TestStatus::Timeout))
            .count();
        let suite_skipped = cases
            .iter()
            .filter(|t| t.status == TestStatus::Skipped)
            .count();
        let suite_time: f64 = cases.iter().map(|t| t.duration.as_secs_f64()).sum();

        let _ = writeln!(
            out,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{suite_failures}\" skipped=\"{suite_skipped}\" time=\"{suite_time:.3}\">",
            escape(&execution.name),
            cases.len(),
        );

        for case in cases {
            render_case(&mut out, &execution.name, case);
        }

        out.push_str("  </testsuite>\n");
    }

    out.push_str("</testsuites>\n");
    out
}

fn render_case(out: &mut String, suite: &str, case: &TestEntry) {
    let _ = writeln!(
        out,
        "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\">",
        escape(&case.key),
        escape(suite),
        case.duration.as_secs_f64(),
    );

    match case.status {
        TestStatus::Success => {}
        TestStatus::Skipped => {
            let _ = writeln!(
                out,
                "      <skipped message=\"{}\"/>",
                escape(&cause_text(case)),
            );
        }
        _ => {
            let _ = writeln!(
                out,
                "      <failure message=\"{}\">{}</failure>",
                escape(&cause_text(case)),
                escape(&case.log_file.as_deref().map(display_path).unwrap_or_default()),
            );
        }
    }

    out.push_str("      <properties>\n");
    let _ = writeln!(
        out,
        "        <property name=\"attempts\" value=\"{}\"/>",
        case.attempts
    );
    if let Some(cause) = case.cause {
        let _ = writeln!(
            out,
            "        <property name=\"cause\" value=\"{cause}\"/>",
        );
    }
    if let Some(instance) = &case.run_on {
        let _ = writeln!(
            out,
            "        <property name=\"cluster\" value=\"{}\"/>",
            escape(instance),
        );
    }
    if let Some(dir) = &case.artifacts_dir {
        let _ = writeln!(
            out,
            "        <property name=\"artifacts\" value=\"{}\"/>",
            escape(&display_path(dir)),
        );
    }
    out.push_str("      </properties>\n");
    out.push_str("    </testcase>\n");
}

/// Human-readable case annotation: explicit cause, detail message, or the
/// bare status.
fn cause_text(case: &TestEntry) -> String {
    match (case.cause, &case.message) {
        (Some(cause), Some(msg)) => format!("{cause}: {msg}"),
        (Some(cause), None) => cause.to_string(),
        (None, Some(msg)) => msg.clone(),
        (None, None) => format!("{:?}", case.status).to_lowercase(),
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render and write the report, creating parent directories as needed.
pub fn write_report(
    path: &Path,
    executions: &[Arc<ExecutionConfig>],
    tasks: &[TestEntry],
) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {:?}", parent))?;
    }

    let document = render(executions, tasks);
    std::fs::write(path, document)
        .with_context(|| format!("writing report to {:?}", path))?;

    info!(report = %path.display(), "report written");
    Ok(path.to_path_buf())
}
