//! Output formatting and progress reporting

use console::{style, Style, Term};
use fixturist::{RunObserver, RunReport, TestCase, TestOutcome, TestResult};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Progress reporter for a run
///
/// Drives an `indicatif` bar across the discovered tests and prints one
/// PASS/FAIL line per finished test.
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Mutex<Option<ProgressBar>>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: Mutex::new(None),
            use_color,
            quiet,
        }
    }

    /// Start a progress bar for multiple tests
    pub fn start_progress(&self, total: u64, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        if let Ok(mut slot) = self.progress_bar.lock() {
            *slot = Some(pb);
        }
    }

    fn bar(&self) -> Option<ProgressBar> {
        self.progress_bar.lock().ok().and_then(|slot| slot.clone())
    }

    /// Increment progress
    pub fn increment(&self, delta: u64) {
        if let Some(pb) = self.bar() {
            pb.inc(delta);
        }
    }

    /// Update progress message
    pub fn set_message(&self, message: &str) {
        if let Some(pb) = self.bar() {
            pb.set_message(message.to_string());
        }
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Ok(mut slot) = self.progress_bar.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn write_line(&self, line: &str) {
        match self.bar() {
            Some(pb) => pb.suspend(|| {
                let _ = self.term.write_line(line);
            }),
            None => {
                let _ = self.term.write_line(line);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }

        let prefix = if self.use_color {
            style("✓").green().bold().to_string()
        } else {
            "PASS".to_string()
        };

        self.write_line(&format!("{prefix} {message}"));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Always print failures, even in quiet mode
        let prefix = if self.use_color {
            style("✗").red().bold().to_string()
        } else {
            "FAIL".to_string()
        };

        self.write_line(&format!("{prefix} {message}"));
    }

    /// Print an errored-test message
    pub fn error(&self, message: &str) {
        let prefix = if self.use_color {
            style("!").red().bold().to_string()
        } else {
            "ERROR".to_string()
        };

        self.write_line(&format!("{prefix} {message}"));
    }

    /// Print an indented detail line under the previous message
    pub fn detail(&self, message: &str) {
        let line = if self.use_color {
            style(message).dim().to_string()
        } else {
            message.to_string()
        };
        self.write_line(&format!("    {line}"));
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        self.write_line("");
        self.write_line(&styled);
    }

    /// Print one test's comparison result
    pub fn test_result(&self, result: &TestResult) {
        if result.passed {
            self.success(&format!("{} ({:.2}s)", result.name, result.time));
            return;
        }
        self.failure(&format!("{} - {} error(s)", result.name, result.errors.len()));
        for error in &result.errors {
            self.detail(error);
        }
    }

    /// Print run totals
    pub fn summary(&self, report: &RunReport) {
        let failed = report.failure_count();
        let errored = report.error_count();
        if self.quiet && failed == 0 && errored == 0 {
            return;
        }

        self.write_line("");

        let total = report.total_count();
        let passed = report.passed_count();
        let seconds = report.total_seconds().unwrap_or_default();

        if self.use_color {
            let passed_style = Style::new().green().bold();
            let failed_style = Style::new().red().bold();

            let status = if report.all_passed() {
                passed_style.apply_to("PASSED")
            } else {
                failed_style.apply_to("FAILED")
            };

            self.write_line(&format!(
                "{} {} tests in {:.2}s ({} passed, {} failed, {} errored)",
                status,
                total,
                seconds,
                passed_style.apply_to(passed),
                if failed > 0 {
                    failed_style.apply_to(failed).to_string()
                } else {
                    failed.to_string()
                },
                if errored > 0 {
                    failed_style.apply_to(errored).to_string()
                } else {
                    errored.to_string()
                },
            ));
        } else {
            let status = if report.all_passed() { "PASSED" } else { "FAILED" };
            self.write_line(&format!(
                "{status} {total} tests in {seconds:.2}s ({passed} passed, {failed} failed, {errored} errored)"
            ));
        }

        if !report.verifier_loaded && !self.quiet {
            self.write_line("secondary verifier not loaded; its checks were skipped");
        }
    }
}

impl RunObserver for ProgressReporter {
    fn on_discovered(&self, tests: &[TestCase]) {
        self.header(&format!("Running {} test(s)", tests.len()));
        self.start_progress(tests.len() as u64, "");
    }

    fn on_test_started(&self, case: &TestCase) {
        self.set_message(&case.name);
    }

    fn on_test_finished(&self, outcome: &TestOutcome) {
        match outcome {
            TestOutcome::Completed(result) => self.test_result(result),
            TestOutcome::Errored { name, stage, error } => {
                self.error(&format!("{name} errored during {stage}"));
                self.detail(error);
            }
        }
        self.increment(1);
    }

    fn on_run_finished(&self, report: &RunReport) {
        self.finish();
        self.summary(report);
    }
}
