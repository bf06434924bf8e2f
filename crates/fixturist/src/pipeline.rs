//! Per-test pipeline.
//!
//! Each test moves through a fixed sequence of stages:
//!
//! ```text
//! Discovered → SettingUp → Generating → Verifying → Comparing → TearingDown → Done
//!                  │            │            │            │            │
//!                  └────────────┴────────────┴────────────┴────────────┴──▶ Errored
//! ```
//!
//! A failing stage stops the test and becomes its outcome; it never stops
//! the run. Per-file problems found while comparing are not failures of
//! the stage: they are recorded on the [`TestResult`].

use crate::case::{TestCase, TestOutcome, TestResult};
use crate::comparator::{PixelComparator, FAILED_COMPARISON_METRIC, MAX_CONCURRENT_COMPARE_JOBS};
use crate::config::{FixtureLayout, RunConfig, TestConfig};
use crate::differ::{diff_trees, DirectoryDiffer, IgnorePattern};
use crate::host::{GenerationPlugin, HostDriver, SecondaryVerifier};
use crate::limiter::{BatchError, BatchRunner, ReplenishOrder};
use crate::result::{FixturistError, FixturistResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

/// Pipeline stage of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Found by discovery, not started
    Discovered,
    /// Preparing the working directory
    SettingUp,
    /// Host is generating assets
    Generating,
    /// Secondary verifier is running
    Verifying,
    /// Diffing and pixel-comparing outputs
    Comparing,
    /// Removing the working directory
    TearingDown,
    /// Finished with a structured result
    Done,
    /// Stopped by a stage failure
    Errored,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::SettingUp => "setup",
            Self::Generating => "generate",
            Self::Verifying => "verify",
            Self::Comparing => "compare",
            Self::TearingDown => "teardown",
            Self::Done => "done",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Where a test's generation runs
#[derive(Debug)]
pub enum WorkingDir {
    /// Temporary directory, removed on drop
    Ephemeral(TempDir),
    /// Directory under the configured working root, named after the test
    Persistent(PathBuf),
}

impl WorkingDir {
    /// Allocate a temporary working directory
    pub async fn ephemeral() -> FixturistResult<Self> {
        let dir = tokio::task::spawn_blocking(|| tempfile::Builder::new().prefix("fixturist-").tempdir())
            .await
            .map_err(|e| FixturistError::setup(format!("temp dir task failed: {e}")))?
            .map_err(|e| FixturistError::setup(format!("cannot create temp dir: {e}")))?;
        Ok(Self::Ephemeral(dir))
    }

    /// Create (if needed) `root/name`
    pub async fn persistent(root: &Path, name: &str) -> FixturistResult<Self> {
        let dir = root.join(name);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            FixturistError::setup(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self::Persistent(dir))
    }

    /// Directory path
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Ephemeral(dir) => dir.path(),
            Self::Persistent(dir) => dir,
        }
    }

    /// Leave the directory on disk
    pub fn keep(self) -> PathBuf {
        match self {
            Self::Ephemeral(dir) => dir.keep(),
            Self::Persistent(dir) => dir,
        }
    }

    /// Delete the directory and everything in it
    pub async fn remove(self) -> FixturistResult<()> {
        match self {
            Self::Ephemeral(dir) => tokio::task::spawn_blocking(move || dir.close())
                .await
                .map_err(|e| FixturistError::setup(format!("cleanup task failed: {e}")))??,
            Self::Persistent(dir) => tokio::fs::remove_dir_all(&dir).await?,
        }
        Ok(())
    }
}

/// Compare stage: tree diff plus bounded pixel comparison
#[derive(Clone)]
pub struct CompareStage {
    comparator: Arc<dyn PixelComparator>,
    batch: BatchRunner,
    differ: DirectoryDiffer,
    ignore: IgnorePattern,
    log_file: String,
}

impl fmt::Debug for CompareStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompareStage")
            .field("batch", &self.batch)
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}

impl CompareStage {
    /// Compare stage for `layout` using `comparator`
    #[must_use]
    pub fn new(comparator: Arc<dyn PixelComparator>, layout: &FixtureLayout) -> Self {
        Self {
            comparator,
            batch: BatchRunner::new(MAX_CONCURRENT_COMPARE_JOBS),
            differ: DirectoryDiffer::new().with_optional_subdir(layout.verifier_asset_dir.clone()),
            ignore: IgnorePattern::default(),
            log_file: layout.log_file.clone(),
        }
    }

    /// Set how queued comparisons replace finished ones
    #[must_use]
    pub fn with_order(mut self, order: ReplenishOrder) -> Self {
        self.batch = self.batch.with_order(order);
        self
    }

    /// Compare `subdirs` of `actual_root` against those of `expected_root`
    ///
    /// Only an unlistable required directory is an error; everything else
    /// is recorded on the returned result.
    pub async fn run(
        &self,
        name: &str,
        expected_root: &Path,
        actual_root: &Path,
        subdirs: &[String],
        threshold: f64,
    ) -> FixturistResult<TestResult> {
        let (expected, actual) = futures::try_join!(
            self.differ.list_relative(expected_root, subdirs),
            self.differ.list_relative(actual_root, subdirs),
        )?;

        let mut result = TestResult::new(name);
        result.spec_files = self.ignore.filter(expected);
        result.actual_files = self.ignore.filter(actual);

        let diff = diff_trees(&result.spec_files, &result.actual_files);
        for file in &diff.missing {
            result.push_error(format!("file {file} missing from output"));
        }
        for file in &diff.unexpected {
            result.push_error(format!("file {file} is unexpectedly in output"));
        }

        let to_compare: Vec<String> = diff
            .matched
            .into_iter()
            .filter(|file| !self.is_log_file(file))
            .collect();

        let jobs: Vec<_> = to_compare
            .iter()
            .map(|file| {
                let comparator = Arc::clone(&self.comparator);
                let expected = expected_root.join(file);
                let actual = actual_root.join(file);
                move || async move {
                    Ok::<_, Infallible>(comparator.compare(&expected, &actual).await)
                }
            })
            .collect();
        let outcomes = match self.batch.run(jobs).await {
            Ok(outcomes) => outcomes,
            Err(BatchError::Job(never)) => match never {},
            Err(BatchError::Cancelled) => {
                return Err(FixturistError::comparison_io(format!(
                    "comparison jobs for {name} were cancelled"
                )))
            }
        };

        for (file, outcome) in to_compare.into_iter().zip(outcomes) {
            match outcome {
                Ok(metric) => {
                    tracing::debug!(test = name, file = %file, metric, "compared");
                    result.push_comparison(file.clone(), metric);
                    if metric > threshold {
                        result.push_error(format!(
                            "file {file} has a comparison metric of {metric} > {threshold}"
                        ));
                    }
                }
                Err(e) => {
                    let detail = match e {
                        FixturistError::PixelTool { message } => message,
                        other => other.to_string(),
                    };
                    tracing::debug!(test = name, file = %file, error = %detail, "comparison failed");
                    result.push_comparison(file.clone(), FAILED_COMPARISON_METRIC);
                    result.push_error(format!(
                        "file {file} Failed completely during comparison:{detail}"
                    ));
                }
            }
        }
        Ok(result)
    }

    fn is_log_file(&self, file: &str) -> bool {
        file.rsplit('/').next() == Some(self.log_file.as_str())
    }
}

/// Runs one test case through every stage
pub struct PipelineRunner {
    host: Arc<dyn HostDriver>,
    plugin: GenerationPlugin,
    verifier: Option<Arc<dyn SecondaryVerifier>>,
    compare: CompareStage,
    layout: FixtureLayout,
    working_root: Option<PathBuf>,
    cleanup: bool,
    honor_plugin_config: bool,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("plugin", &self.plugin)
            .field("verifier", &self.verifier.is_some())
            .field("working_root", &self.working_root)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Create a runner for `config`
    #[must_use]
    pub fn new(
        host: Arc<dyn HostDriver>,
        plugin: GenerationPlugin,
        comparator: Arc<dyn PixelComparator>,
        config: &RunConfig,
        layout: FixtureLayout,
    ) -> Self {
        Self {
            host,
            plugin,
            verifier: None,
            compare: CompareStage::new(comparator, &layout).with_order(config.replenish_order),
            layout,
            working_root: config.working_directory.clone(),
            cleanup: config.cleanup,
            honor_plugin_config: config.honor_generator_assets_config,
        }
    }

    /// Run the secondary verifier after generation
    #[must_use]
    pub fn with_verifier(mut self, verifier: Option<Arc<dyn SecondaryVerifier>>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Run `case`, turning any stage failure into an errored outcome
    pub async fn run_case(&self, mut case: TestCase) -> TestOutcome {
        tracing::info!(test = %case.name, input = %case.input, "TEST RUNNING");
        let mut stage = Stage::Discovered;
        match self.drive(&mut case, &mut stage).await {
            Ok(result) => {
                tracing::info!(
                    test = %case.name,
                    passed = result.passed,
                    errors = result.errors.len(),
                    time = result.time,
                    "TEST COMPLETE"
                );
                TestOutcome::Completed(result)
            }
            Err(e) => {
                tracing::info!(test = %case.name, stage = %stage, error = %e, "TEST ERRORED");
                TestOutcome::Errored {
                    name: case.name,
                    stage,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn drive(&self, case: &mut TestCase, stage: &mut Stage) -> FixturistResult<TestResult> {
        *stage = Stage::SettingUp;
        let workdir = self.setup(case).await?;

        match self.generate_and_compare(case, stage).await {
            Ok(result) => {
                *stage = Stage::TearingDown;
                self.teardown(workdir).await?;
                *stage = Stage::Done;
                Ok(result)
            }
            Err(e) => {
                if !self.cleanup {
                    let kept = workdir.keep();
                    tracing::debug!(dir = %kept.display(), "keeping working directory");
                }
                Err(e)
            }
        }
    }

    async fn generate_and_compare(
        &self,
        case: &mut TestCase,
        stage: &mut Stage,
    ) -> FixturistResult<TestResult> {
        *stage = Stage::Generating;
        self.generate(case).await?;

        *stage = Stage::Verifying;
        let verify_time = self.verify(case).await?;

        *stage = Stage::Comparing;
        let mut result = self.compare(case).await?;
        result.verify_time = verify_time;
        Ok(result)
    }

    async fn setup(&self, case: &mut TestCase) -> FixturistResult<WorkingDir> {
        self.host
            .close_all_documents()
            .await
            .map_err(|e| FixturistError::setup(format!("cannot close open documents: {e}")))?;

        let workdir = match &self.working_root {
            Some(root) => WorkingDir::persistent(root, &case.name).await?,
            None => WorkingDir::ephemeral().await?,
        };
        tracing::debug!(test = %case.name, dir = %workdir.path().display(), "working directory ready");

        let source = case.input_path();
        let dest = workdir.path().join(&case.input);
        tokio::fs::copy(&source, &dest).await.map_err(|e| {
            FixturistError::setup(format!("cannot copy {}: {e}", source.display()))
        })?;

        let config_source = case.base_dir.join(&self.layout.test_config_file);
        if tokio::fs::metadata(&config_source).await.is_ok_and(|m| m.is_file()) {
            let config_dest = workdir.path().join(&self.layout.test_config_file);
            tokio::fs::copy(&config_source, &config_dest).await.map_err(|e| {
                FixturistError::setup(format!("cannot copy {}: {e}", config_source.display()))
            })?;
        }

        case.working_dir = Some(workdir.path().to_path_buf());
        Ok(workdir)
    }

    async fn generate(&self, case: &mut TestCase) -> FixturistResult<()> {
        let workdir = working_dir(case)?;
        let saved = self.plugin.config().await?;

        let test_config = TestConfig::load(
            &workdir.join(&self.layout.test_config_file),
            &self.layout.plugin_namespace,
        )
        .await;
        case.max_compare_metric = test_config.max_compare_metric();

        tracing::debug!(
            test = %case.name,
            merge = self.honor_plugin_config,
            keys = test_config.section().len(),
            "applying test plugin config"
        );
        let generated = async {
            self.plugin
                .set_config(test_config.into_section(), self.honor_plugin_config)
                .await?;
            self.open_and_run(case, &workdir).await
        }
        .await;

        // The user's settings come back whether or not generation succeeded
        let restored = self.plugin.set_config(saved, false).await;
        if let (Err(_), Err(e)) = (&generated, &restored) {
            tracing::warn!(test = %case.name, error = %e, "cannot restore plugin config");
        }
        generated.and(restored)
    }

    async fn open_and_run(&self, case: &mut TestCase, workdir: &Path) -> FixturistResult<()> {
        let document = self
            .host
            .open_document(&workdir.join(&case.input))
            .await?
            .ok_or_else(|| {
                FixturistError::generation("did not get a valid document ID after opening the document")
            })?;

        let active = self.plugin.when_active();
        case.document_id = Some(document);
        self.plugin.activate(document).await?;
        active.await?;

        case.start_time = Some(Utc::now());
        self.plugin.when_idle(document).await?;
        case.stop_time = Some(Utc::now());
        Ok(())
    }

    async fn verify(&self, case: &mut TestCase) -> FixturistResult<Option<f64>> {
        let Some(verifier) = &self.verifier else {
            tracing::warn!(test = %case.name, "skipping secondary verification: plugin not loaded");
            return Ok(None);
        };
        let started = Instant::now();
        *case = verifier.run_test(case.clone()).await?;
        let elapsed = started.elapsed().as_secs_f64();
        tracing::debug!(test = %case.name, seconds = elapsed, "secondary verification done");
        Ok(Some(elapsed))
    }

    async fn compare(&self, case: &TestCase) -> FixturistResult<TestResult> {
        let workdir = working_dir(case)?;
        let mut subdirs = vec![case.output.clone()];
        if self.verifier.is_some() {
            subdirs.push(self.layout.verifier_asset_dir.clone());
        }

        let mut result = self
            .compare
            .run(&case.name, &case.base_dir, &workdir, &subdirs, case.max_compare_metric)
            .await?;
        result.time = case.generation_seconds();
        Ok(result)
    }

    async fn teardown(&self, workdir: WorkingDir) -> FixturistResult<()> {
        if self.cleanup {
            workdir.remove().await
        } else {
            let kept = workdir.keep();
            tracing::debug!(dir = %kept.display(), "cleanup disabled, keeping working directory");
            Ok(())
        }
    }
}

fn working_dir(case: &TestCase) -> FixturistResult<PathBuf> {
    case.working_dir
        .clone()
        .ok_or_else(|| FixturistError::setup(format!("{} has no working directory", case.name)))
}
