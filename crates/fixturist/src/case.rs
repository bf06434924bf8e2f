//! Test cases and their outcomes.

use crate::config::DEFAULT_MAX_COMPARE_METRIC;
use crate::host::DocumentId;
use crate::pipeline::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A discovered fixture and its mutable run state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Fixture directory name
    pub name: String,
    /// Absolute fixture directory
    pub base_dir: PathBuf,
    /// Input document file name
    pub input: String,
    /// Expected-output directory name
    pub output: String,
    /// Directory where generation runs
    pub working_dir: Option<PathBuf>,
    /// Host document identifier once opened
    pub document_id: Option<DocumentId>,
    /// Generation became active
    pub start_time: Option<DateTime<Utc>>,
    /// Generation became idle
    pub stop_time: Option<DateTime<Utc>>,
    /// Threshold above which a comparison fails
    pub max_compare_metric: f64,
}

impl TestCase {
    /// Create a case from its identity
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
            input: input.into(),
            output: output.into(),
            working_dir: None,
            document_id: None,
            start_time: None,
            stop_time: None,
            max_compare_metric: DEFAULT_MAX_COMPARE_METRIC,
        }
    }

    /// Fixture document inside the fixture directory
    #[must_use]
    pub fn input_path(&self) -> PathBuf {
        self.base_dir.join(&self.input)
    }

    /// Seconds between the active and idle signals (0 if either is missing)
    #[must_use]
    pub fn generation_seconds(&self) -> f64 {
        match (self.start_time, self.stop_time) {
            (Some(start), Some(stop)) => (stop - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

/// Metric measured for one matched file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Path relative to the output root
    pub file: String,
    /// Mean pixel difference
    pub metric: f64,
}

/// Structured result of a test that reached the comparison stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// True iff no errors were recorded
    pub passed: bool,
    /// Expected files after ignore filtering
    pub spec_files: Vec<String>,
    /// Generated files after ignore filtering
    pub actual_files: Vec<String>,
    /// Human-readable errors in the order they were found
    pub errors: Vec<String>,
    /// Every metric measured, passing or not
    pub comparisons: Vec<Comparison>,
    /// Generation time in seconds
    pub time: f64,
    /// Secondary verification time in seconds, when it ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_time: Option<f64>,
}

impl TestResult {
    /// Empty, passing result
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            spec_files: Vec::new(),
            actual_files: Vec::new(),
            errors: Vec::new(),
            comparisons: Vec::new(),
            time: 0.0,
            verify_time: None,
        }
    }

    /// Record an error, failing the result
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.passed = false;
    }

    /// Record a measured metric
    pub fn push_comparison(&mut self, file: impl Into<String>, metric: f64) {
        self.comparisons.push(Comparison {
            file: file.into(),
            metric,
        });
    }
}

/// What a test produced: a structured result or the error that stopped it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum TestOutcome {
    /// Reached comparison; may have failed assertions
    Completed(TestResult),
    /// Pipeline stopped before producing a result
    Errored {
        /// Test name
        name: String,
        /// Stage that failed
        stage: Stage,
        /// Error text, verbatim
        error: String,
    },
}

impl TestOutcome {
    /// Name of the test
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Completed(result) => &result.name,
            Self::Errored { name, .. } => name,
        }
    }

    /// Completed without errors
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Completed(result) if result.passed)
    }

    /// Completed with errors
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Completed(result) if !result.passed)
    }

    /// Did not complete
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Errored { .. })
    }

    /// Structured result, if any
    #[must_use]
    pub fn result(&self) -> Option<&TestResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Errored { .. } => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_case_paths() {
        let case = TestCase::new("caseA", "/fx/caseA", "doc.psd", "doc-assets");
        assert_eq!(case.input_path(), PathBuf::from("/fx/caseA/doc.psd"));
        assert_eq!(case.working_dir, None);
        assert_eq!(case.max_compare_metric, DEFAULT_MAX_COMPARE_METRIC);
    }

    #[test]
    fn test_generation_seconds() {
        let mut case = TestCase::new("caseA", "/fx/caseA", "doc.psd", "doc-assets");
        assert_eq!(case.generation_seconds(), 0.0);
        let start = Utc::now();
        case.start_time = Some(start);
        case.stop_time = Some(start + Duration::milliseconds(2500));
        assert_eq!(case.generation_seconds(), 2.5);
    }

    #[test]
    fn test_case_json_is_camel_case() {
        let case = TestCase::new("caseA", "/fx/caseA", "doc.psd", "doc-assets");
        let json = serde_json::to_value(&case).unwrap();
        assert_eq!(json["baseDir"], "/fx/caseA");
        assert!(json.get("maxCompareMetric").is_some());
        let back: TestCase = serde_json::from_value(json).unwrap();
        assert_eq!(back, case);
    }

    #[test]
    fn test_passed_tracks_errors() {
        let mut result = TestResult::new("caseA");
        assert!(result.passed && result.errors.is_empty());
        result.push_comparison("doc-assets/logo.png", 3.2);
        assert!(result.passed);
        result.push_error("file doc-assets/logo.png missing from output");
        assert!(!result.passed);
        assert_eq!(result.passed, result.errors.is_empty());
    }

    #[test]
    fn test_outcome_kinds() {
        let pass = TestOutcome::Completed(TestResult::new("a"));
        let mut failed = TestResult::new("b");
        failed.push_error("boom");
        let fail = TestOutcome::Completed(failed);
        let error = TestOutcome::Errored {
            name: "c".to_string(),
            stage: Stage::Generating,
            error: "no document".to_string(),
        };

        assert!(pass.is_pass() && !pass.is_failure() && !pass.is_error());
        assert!(fail.is_failure() && !fail.is_pass());
        assert!(error.is_error() && error.result().is_none());
        assert_eq!(error.name(), "c");
    }

    #[test]
    fn test_outcome_json_tag() {
        let error = TestOutcome::Errored {
            name: "c".to_string(),
            stage: Stage::SettingUp,
            error: "copy failed".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["outcome"], "errored");
        assert_eq!(json["stage"], "setting-up");
    }
}
