//! Run aggregation and report rendering.
//!
//! Renders the plain-text summary and the xUnit report consumed by CI.
//! A test that stopped before comparison is an xUnit `error`; a test whose
//! comparison recorded errors is a `failure` with one element per error.

use crate::case::TestOutcome;
use crate::result::FixturistResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Suite and class name used in the xUnit report
pub const SUITE_NAME: &str = "generatorAssetsAutomation";

const INDENT: &str = "    ";

/// Outcomes of one sequential run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Per-test outcomes in execution order
    pub outcomes: Vec<TestOutcome>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the last test finished
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether the secondary verifier took part
    pub verifier_loaded: bool,
}

impl RunReport {
    /// Empty report for a run starting now
    #[must_use]
    pub fn new(verifier_loaded: bool) -> Self {
        Self {
            outcomes: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            verifier_loaded,
        }
    }

    /// Append a test outcome
    pub fn push(&mut self, outcome: TestOutcome) {
        self.outcomes.push(outcome);
    }

    /// Mark the run finished now
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Number of tests
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Tests that passed
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_pass()).count()
    }

    /// Tests that completed with errors
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    /// Tests that could not complete
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_error()).count()
    }

    /// Whether every test passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed_count() == self.total_count()
    }

    /// Wall-clock run time in seconds, once finished
    #[must_use]
    pub fn total_seconds(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Time spent in secondary verification, in seconds
    #[must_use]
    pub fn verify_seconds(&self) -> f64 {
        self.outcomes
            .iter()
            .filter_map(TestOutcome::result)
            .filter_map(|r| r.verify_time)
            .sum()
    }

    /// Plain-text summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}/{} tests passed\n\n",
            self.passed_count(),
            self.total_count()
        );

        for outcome in &self.outcomes {
            match outcome {
                TestOutcome::Errored { name, error, .. } => {
                    summary.push_str(&format!("execution error: {name} - {error}\n"));
                }
                TestOutcome::Completed(result) if result.passed => {
                    summary.push_str(&format!(
                        "passed: {} - {} seconds\n",
                        result.name, result.time
                    ));
                }
                TestOutcome::Completed(result) => {
                    summary.push_str(&format!(
                        "failed: {} - {} error(s)\n",
                        result.name,
                        result.errors.len()
                    ));
                    for error in &result.errors {
                        summary.push_str(&format!("   {error}\n"));
                    }
                }
            }
        }

        if let Some(total) = self.total_seconds() {
            summary.push_str(&format!(
                "\nTotal test time (including automation overhead): {total} seconds"
            ));
        }
        summary
    }

    /// Text shown to the host user after a manually triggered run
    #[must_use]
    pub fn alert_text(&self) -> String {
        let mut text = String::from("Generator automated test summary:\n\n");
        if !self.verifier_loaded {
            text.push_str("CREMA PLUGIN NOT LOADED.\nCrema tests were skipped.\n\n");
        }
        text.push_str(&self.summary());
        text
    }

    /// xUnit report
    #[must_use]
    pub fn render_junit(&self) -> String {
        let mut cases = String::new();
        for outcome in &self.outcomes {
            match outcome {
                TestOutcome::Errored { name, error, .. } => {
                    cases.push_str(&format!(
                        "{INDENT}{INDENT}<testcase classname='{SUITE_NAME}' name='{}'>\n",
                        escape_xml(name)
                    ));
                    cases.push_str(&format!(
                        "{INDENT}{INDENT}{INDENT}<error>{}</error>\n",
                        escape_xml(error)
                    ));
                }
                TestOutcome::Completed(result) => {
                    cases.push_str(&format!(
                        "{INDENT}{INDENT}<testcase classname='{SUITE_NAME}' name='{}' time='{}'>\n",
                        escape_xml(&result.name),
                        result.time
                    ));
                    for error in &result.errors {
                        cases.push_str(&format!(
                            "{INDENT}{INDENT}{INDENT}<failure message='failed'>{}</failure>\n",
                            escape_xml(error)
                        ));
                    }
                }
            }
            cases.push_str(&format!("{INDENT}{INDENT}</testcase>\n"));
        }

        let time = self
            .total_seconds()
            .map(|t| format!(" time='{t}'"))
            .unwrap_or_default();

        let mut xml = String::from("<?xml version='1.0' encoding='UTF-8'?>\n<testsuites>\n");
        xml.push_str(&format!(
            "{INDENT}<testsuite name='{SUITE_NAME}' errors='{}' tests='{}' failures='{}'{time}>\n",
            self.error_count(),
            self.total_count(),
            self.failure_count()
        ));
        xml.push_str(&cases);
        xml.push_str(&format!("{INDENT}</testsuite>\n</testsuites>"));
        xml
    }

    /// Write the xUnit report and then the summary, each only if its path is set
    pub async fn write_artifacts(
        &self,
        xml_path: Option<&Path>,
        log_path: Option<&Path>,
    ) -> FixturistResult<()> {
        if let Some(path) = xml_path {
            tracing::info!(path = %path.display(), "writing XML results");
            write_file(path, self.render_junit()).await?;
        }
        if let Some(path) = log_path {
            tracing::info!(path = %path.display(), "writing results log");
            write_file(path, self.summary()).await?;
        }
        Ok(())
    }
}

async fn write_file(path: &Path, contents: String) -> FixturistResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
