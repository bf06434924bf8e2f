//! Run orchestration.
//!
//! An [`Orchestrator`] owns a [`RunContext`] built once at startup. A run
//! discovers the fixtures, makes sure the asset plugin is available, drives
//! every test through the pipeline strictly one after another, closes the
//! host's documents, and writes the configured artifacts.

use crate::case::{TestCase, TestOutcome};
use crate::comparator::PixelComparator;
use crate::config::{FixtureLayout, RunConfig, ASSETS_PLUGIN_ID, VERIFIER_PLUGIN_ID};
use crate::discovery::discover_tests;
use crate::host::{acquire, GenerationPlugin, HostDriver, SecondaryVerifier};
use crate::pipeline::PipelineRunner;
use crate::report::RunReport;
use crate::result::FixturistResult;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Everything a run needs, built once and passed by reference
#[derive(Clone)]
pub struct RunContext {
    /// Run-level configuration
    pub config: RunConfig,
    /// Fixture naming conventions
    pub layout: FixtureLayout,
    /// Host application
    pub host: Arc<dyn HostDriver>,
    /// Pixel-difference implementation
    pub comparator: Arc<dyn PixelComparator>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Context with the default fixture layout
    #[must_use]
    pub fn new(
        config: RunConfig,
        host: Arc<dyn HostDriver>,
        comparator: Arc<dyn PixelComparator>,
    ) -> Self {
        Self {
            config,
            layout: FixtureLayout::default(),
            host,
            comparator,
        }
    }

    /// Use a different fixture layout
    #[must_use]
    pub fn with_layout(mut self, layout: FixtureLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Progress callbacks; every method defaults to doing nothing
pub trait RunObserver: Send + Sync {
    /// Tests about to run
    fn on_discovered(&self, _tests: &[TestCase]) {}

    /// A test is starting
    fn on_test_started(&self, _case: &TestCase) {}

    /// A test finished
    fn on_test_finished(&self, _outcome: &TestOutcome) {}

    /// The run finished and its artifacts were written
    fn on_run_finished(&self, _report: &RunReport) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

#[derive(Clone)]
struct Handles {
    plugin: GenerationPlugin,
    verifier: Option<Arc<dyn SecondaryVerifier>>,
}

/// Drives complete runs against one host
pub struct Orchestrator {
    ctx: RunContext,
    observer: Arc<dyn RunObserver>,
    handles: OnceCell<Handles>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("ctx", &self.ctx)
            .field("handles_acquired", &self.handles.initialized())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            observer: Arc::new(NoopObserver),
            handles: OnceCell::new(),
        }
    }

    /// Report progress to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run when autorun is set, then once per host run request
    ///
    /// Returns the reports of every run, in order, once the host stops
    /// sending requests.
    pub async fn serve(&self) -> FixturistResult<Vec<RunReport>> {
        let mut reports = Vec::new();
        if self.ctx.config.autorun {
            reports.push(self.run_all().await?);
        } else {
            tracing::info!("waiting for a run request from the host");
        }
        while self.ctx.host.next_run_request().await {
            reports.push(self.run_all().await?);
        }
        Ok(reports)
    }

    /// Run every discovered test once
    ///
    /// Fails only when discovery fails, the asset plugin never becomes
    /// available, the host cannot close documents at the end, or an
    /// artifact cannot be written. Individual test failures are part of
    /// the report.
    pub async fn run_all(&self) -> FixturistResult<RunReport> {
        tracing::info!("running all tests");
        let tests = discover_tests(&self.ctx.config, &self.ctx.layout).await?;
        self.observer.on_discovered(&tests);

        let handles = self.handles().await?;
        let runner = PipelineRunner::new(
            Arc::clone(&self.ctx.host),
            handles.plugin,
            Arc::clone(&self.ctx.comparator),
            &self.ctx.config,
            self.ctx.layout.clone(),
        )
        .with_verifier(handles.verifier.clone());

        let mut report = RunReport::new(handles.verifier.is_some());
        for case in tests {
            self.observer.on_test_started(&case);
            let outcome = runner.run_case(case).await;
            self.observer.on_test_finished(&outcome);
            report.push(outcome);
        }

        self.ctx.host.close_all_documents().await?;
        report.finish();

        report
            .write_artifacts(
                self.ctx.config.results_xml_path.as_deref(),
                self.ctx.config.results_log_path.as_deref(),
            )
            .await?;

        let summary = report.summary();
        tracing::info!("all tests done");
        match serde_json::to_string_pretty(&report.outcomes) {
            Ok(json) => tracing::info!(results = %json, "all results"),
            Err(e) => tracing::warn!(error = %e, "cannot serialize results"),
        }
        tracing::info!(summary = %summary, "summary");
        if report.verifier_loaded {
            tracing::info!(seconds = report.verify_seconds(), "total secondary verification time");
        }

        if !self.ctx.config.autorun {
            self.ctx.host.alert(&report.alert_text()).await?;
        }

        self.observer.on_run_finished(&report);
        Ok(report)
    }

    async fn handles(&self) -> FixturistResult<Handles> {
        self.handles
            .get_or_try_init(|| self.acquire_handles())
            .await
            .cloned()
    }

    async fn acquire_handles(&self) -> FixturistResult<Handles> {
        let config = &self.ctx.config;
        let host = &self.ctx.host;

        let raw = acquire(
            ASSETS_PLUGIN_ID,
            config.plugin_poll_interval(),
            config.plugin_timeout(),
            || host.find_asset_plugin(ASSETS_PLUGIN_ID),
        )
        .await?;
        let plugin = GenerationPlugin::resolve(raw)?;
        tracing::info!(plugin = ASSETS_PLUGIN_ID, flavor = ?plugin.flavor(), "asset plugin ready");

        let verifier = match acquire(
            VERIFIER_PLUGIN_ID,
            config.plugin_poll_interval(),
            config.plugin_timeout(),
            || host.find_verifier(VERIFIER_PLUGIN_ID),
        )
        .await
        {
            Ok(verifier) => Some(verifier),
            // Missing or broken, the verifier only ever degrades the run
            Err(e) => {
                tracing::warn!(error = %e, "secondary verifier unavailable; its tests will be skipped");
                None
            }
        };

        Ok(Handles { plugin, verifier })
    }
}
