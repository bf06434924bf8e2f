//! In-crate mocks of the host collaborators, for unit tests.

use crate::case::TestCase;
use crate::comparator::PixelComparator;
use crate::config::PluginConfig;
use crate::host::{
    AssetPlugin, DocumentId, HostDriver, LegacyApi, SecondaryVerifier, StatusApi,
};
use crate::result::{FixturistError, FixturistResult};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

type Generator = Box<dyn Fn(&Path) + Send + Sync>;

/// Mock host application
#[derive(Default)]
pub struct MockHost {
    plugin: Option<Arc<dyn AssetPlugin>>,
    plugin_hidden_for: usize,
    verifier: Option<Arc<dyn SecondaryVerifier>>,
    generator: Option<Generator>,
    no_document_ids: bool,
    state: Mutex<MockHostState>,
}

#[derive(Default)]
struct MockHostState {
    call_history: Vec<String>,
    next_document: DocumentId,
    alerts: Vec<String>,
    run_requests: usize,
    plugin_lookups: usize,
}

impl std::fmt::Debug for MockHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHost").finish_non_exhaustive()
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn AssetPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    /// Plugin lookups fail this many times before the plugin appears
    pub fn with_plugin_hidden_for(mut self, lookups: usize) -> Self {
        self.plugin_hidden_for = lookups;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SecondaryVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Called with the opened document's path to simulate generation
    pub fn with_generator(mut self, generator: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn without_document_ids(mut self) -> Self {
        self.no_document_ids = true;
        self
    }

    pub fn with_run_requests(self, count: usize) -> Self {
        self.state.lock().unwrap().run_requests = count;
        self
    }

    pub fn history(&self) -> Vec<String> {
        self.state.lock().unwrap().call_history.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.history().iter().filter(|c| c.starts_with(call)).count()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.state.lock().unwrap().alerts.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().call_history.push(call);
    }
}

#[async_trait]
impl HostDriver for MockHost {
    async fn open_document(&self, path: &Path) -> FixturistResult<Option<DocumentId>> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.record(format!("open_document:{name}"));
        if let Some(generator) = &self.generator {
            generator(path);
        }
        if self.no_document_ids {
            return Ok(None);
        }
        let mut state = self.state.lock().unwrap();
        state.next_document += 1;
        Ok(Some(state.next_document))
    }

    async fn close_all_documents(&self) -> FixturistResult<()> {
        self.record("close_all_documents".to_string());
        Ok(())
    }

    async fn find_asset_plugin(&self, id: &str) -> FixturistResult<Option<Arc<dyn AssetPlugin>>> {
        let mut state = self.state.lock().unwrap();
        state.call_history.push(format!("find_asset_plugin:{id}"));
        state.plugin_lookups += 1;
        if state.plugin_lookups <= self.plugin_hidden_for {
            return Ok(None);
        }
        Ok(self.plugin.clone())
    }

    async fn find_verifier(&self, id: &str) -> FixturistResult<Option<Arc<dyn SecondaryVerifier>>> {
        self.record(format!("find_verifier:{id}"));
        Ok(self.verifier.clone())
    }

    async fn alert(&self, message: &str) -> FixturistResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call_history.push("alert".to_string());
        state.alerts.push(message.to_string());
        Ok(())
    }

    async fn next_run_request(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.run_requests == 0 {
            return false;
        }
        state.run_requests -= 1;
        true
    }
}

/// Status-API plugin that goes active and idle as soon as it is toggled
#[derive(Debug, Default)]
pub struct MockPlugin {
    config: Mutex<PluginConfig>,
    set_calls: Mutex<Vec<(PluginConfig, bool)>>,
    history: Mutex<Vec<String>>,
    active: Arc<Notify>,
    idle: Arc<Notify>,
    fail_toggle: bool,
}

impl MockPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(self, config: PluginConfig) -> Self {
        *self.config.lock().unwrap() = config;
        self
    }

    pub fn failing_activation(mut self) -> Self {
        self.fail_toggle = true;
        self
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }

    pub fn current_config(&self) -> PluginConfig {
        self.config.lock().unwrap().clone()
    }

    pub fn set_calls(&self) -> Vec<(PluginConfig, bool)> {
        self.set_calls.lock().unwrap().clone()
    }
}

fn apply_config(current: &Mutex<PluginConfig>, config: PluginConfig, merge: bool) {
    let mut current = current.lock().unwrap();
    if merge {
        current.extend(config);
    } else {
        *current = config;
    }
}

#[async_trait]
impl AssetPlugin for MockPlugin {
    async fn config(&self) -> FixturistResult<PluginConfig> {
        Ok(self.current_config())
    }

    async fn set_config(&self, config: PluginConfig, merge: bool) -> FixturistResult<()> {
        self.set_calls.lock().unwrap().push((config.clone(), merge));
        apply_config(&self.config, config, merge);
        Ok(())
    }

    fn status_api(self: Arc<Self>) -> Option<Arc<dyn StatusApi>> {
        Some(self)
    }

    fn legacy_api(self: Arc<Self>) -> Option<Arc<dyn LegacyApi>> {
        None
    }
}

#[async_trait]
impl StatusApi for MockPlugin {
    fn when_active(&self) -> BoxFuture<'static, FixturistResult<()>> {
        let active = Arc::clone(&self.active);
        async move {
            active.notified().await;
            Ok(())
        }
        .boxed()
    }

    fn when_idle(&self) -> BoxFuture<'static, FixturistResult<()>> {
        let idle = Arc::clone(&self.idle);
        async move {
            idle.notified().await;
            Ok(())
        }
        .boxed()
    }

    async fn toggle_active_document(&self) -> FixturistResult<()> {
        self.history.lock().unwrap().push("toggle_active_document".to_string());
        if self.fail_toggle {
            return Err(FixturistError::generation("toggle rejected"));
        }
        self.active.notify_one();
        self.idle.notify_one();
        Ok(())
    }
}

/// Legacy-API plugin; idle is reported as soon as it is subscribed to
#[derive(Debug)]
pub struct LegacyMockPlugin {
    config: Mutex<PluginConfig>,
    history: Mutex<Vec<String>>,
    pending_active: Mutex<Option<oneshot::Sender<()>>>,
    has_asset_manager: bool,
}

impl LegacyMockPlugin {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(PluginConfig::new()),
            history: Mutex::new(Vec::new()),
            pending_active: Mutex::new(None),
            has_asset_manager: true,
        }
    }

    pub fn without_asset_manager(mut self) -> Self {
        self.has_asset_manager = false;
        self
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetPlugin for LegacyMockPlugin {
    async fn config(&self) -> FixturistResult<PluginConfig> {
        Ok(self.config.lock().unwrap().clone())
    }

    async fn set_config(&self, config: PluginConfig, merge: bool) -> FixturistResult<()> {
        apply_config(&self.config, config, merge);
        Ok(())
    }

    fn status_api(self: Arc<Self>) -> Option<Arc<dyn StatusApi>> {
        None
    }

    fn legacy_api(self: Arc<Self>) -> Option<Arc<dyn LegacyApi>> {
        Some(self)
    }
}

#[async_trait]
impl LegacyApi for LegacyMockPlugin {
    fn once_active(&self) -> oneshot::Receiver<()> {
        self.history.lock().unwrap().push("once_active".to_string());
        let (tx, rx) = oneshot::channel();
        *self.pending_active.lock().unwrap() = Some(tx);
        rx
    }

    fn once_idle(&self, document: DocumentId) -> Option<oneshot::Receiver<()>> {
        self.history.lock().unwrap().push(format!("once_idle:{document}"));
        if !self.has_asset_manager {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Some(rx)
    }

    async fn activate(&self, document: DocumentId) -> FixturistResult<()> {
        self.history.lock().unwrap().push(format!("activate:{document}"));
        if let Some(tx) = self.pending_active.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

/// Comparator returning canned metrics keyed by relative path suffix
#[derive(Debug, Default)]
pub struct MockComparator {
    metrics: HashMap<String, Result<f64, String>>,
    calls: Mutex<Vec<PathBuf>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    delay: Option<Duration>,
}

impl MockComparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, file: &str, metric: f64) -> Self {
        self.metrics.insert(file.to_string(), Ok(metric));
        self
    }

    pub fn with_failure(mut self, file: &str, stderr: &str) -> Self {
        self.metrics.insert(file.to_string(), Err(stderr.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Actual paths compared so far, sorted
    pub fn calls(&self) -> Vec<PathBuf> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PixelComparator for MockComparator {
    async fn compare(&self, _expected: &Path, actual: &Path) -> FixturistResult<f64> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(actual.to_path_buf());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let canned = self
            .metrics
            .iter()
            .find(|(file, _)| actual.ends_with(file.as_str()))
            .map(|(_, outcome)| outcome.clone());
        match canned {
            Some(Ok(metric)) => Ok(metric),
            Some(Err(stderr)) => Err(FixturistError::pixel_tool(stderr)),
            None => Ok(0.0),
        }
    }
}

/// Secondary verifier that records runs and can write its own assets
#[derive(Debug, Default)]
pub struct MockVerifier {
    runs: Mutex<Vec<String>>,
    assets: Vec<String>,
    failure: Option<String>,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `relative` (under the working directory) on every run
    pub fn with_asset(mut self, relative: &str) -> Self {
        self.assets.push(relative.to_string());
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecondaryVerifier for MockVerifier {
    async fn run_test(&self, case: TestCase) -> FixturistResult<TestCase> {
        self.runs.lock().unwrap().push(case.name.clone());
        if let Some(message) = &self.failure {
            return Err(FixturistError::verification(message.clone()));
        }
        if let Some(dir) = &case.working_dir {
            for asset in &self.assets {
                write_file(&dir.join(asset));
            }
        }
        Ok(case)
    }
}

/// Create `path` (and its parents) with placeholder content
pub fn write_file(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"png").unwrap();
}

/// Build a fixture directory `root/name` with a document and expected outputs
pub fn write_fixture(root: &Path, name: &str, document: &str, outputs: &[&str]) -> PathBuf {
    let dir = root.join(name);
    write_file(&dir.join(document));
    let stem = Path::new(document).file_stem().unwrap().to_string_lossy().into_owned();
    let output_dir = dir.join(format!("{stem}-assets"));
    std::fs::create_dir_all(&output_dir).unwrap();
    for output in outputs {
        write_file(&output_dir.join(output));
    }
    dir
}

/// Generator copying expected outputs next to the opened document
///
/// The source is the fixture under `fixture_root` holding a document with
/// the same file name, so fixtures sharing a run need distinct documents.
pub fn copying_generator(fixture_root: PathBuf) -> impl Fn(&Path) + Send + Sync + 'static {
    move |document: &Path| {
        let (Some(workdir), Some(file_name), Some(stem)) =
            (document.parent(), document.file_name(), document.file_stem())
        else {
            return;
        };
        let output = format!("{}-assets", stem.to_string_lossy());
        for entry in std::fs::read_dir(&fixture_root).unwrap().flatten() {
            let expected = entry.path().join(&output);
            if expected.is_dir() && entry.path().join(file_name).is_file() {
                copy_tree(&expected, &workdir.join(&output));
            }
        }
    }
}

fn copy_tree(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap().flatten() {
        let path = entry.path();
        let target = to.join(entry.file_name());
        if path.is_dir() {
            copy_tree(&path, &target);
        } else {
            std::fs::copy(&path, &target).unwrap();
        }
    }
}
