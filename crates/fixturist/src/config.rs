//! Run-level and per-test configuration.
//!
//! A run is configured by a [`RunConfig`] loaded from JSON or YAML with
//! kebab-case keys. Each fixture directory may carry its own
//! `generator.json` whose `generator-assets` section is handed to the host
//! plugin and may override the comparison threshold.

use crate::limiter::ReplenishOrder;
use crate::result::{FixturistError, FixturistResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Live configuration of the asset-generation plugin
pub type PluginConfig = serde_json::Map<String, serde_json::Value>;

/// Extension of fixture documents (compared case-insensitively)
pub const DOCUMENT_EXTENSION: &str = "psd";
/// Suffix appended to the document basename to name the expected output directory
pub const OUTPUT_DIR_SUFFIX: &str = "-assets";
/// Fixture directories ending with this suffix are never discovered
pub const DISABLED_DIR_SUFFIX: &str = "-disabled";
/// Optional per-test configuration file
pub const TEST_CONFIG_FILE: &str = "generator.json";
/// Identifier of the asset-generation plugin; also the config namespace
pub const ASSETS_PLUGIN_ID: &str = "generator-assets";
/// Identifier of the optional secondary verification plugin
pub const VERIFIER_PLUGIN_ID: &str = "crema";
/// Output directory written by the secondary verifier
pub const VERIFIER_ASSET_DIR: &str = "crema-assets";
/// Generation log that is reported but never pixel-compared
pub const GENERATION_LOG_FILE: &str = "errors.txt";
/// OS metadata files excluded from every listing
pub const IGNORE_PATTERN: &str = r"(\.DS_Store)$|(desktop\.ini)$";
/// Default upper bound for a passing comparison metric
pub const DEFAULT_MAX_COMPARE_METRIC: f64 = 10.0;
/// Default interval between plugin lookups
pub const DEFAULT_PLUGIN_POLL_INTERVAL_MS: u64 = 1_000;
/// Default window for acquiring a plugin handle
pub const DEFAULT_PLUGIN_TIMEOUT_MS: u64 = 10_000;

/// Naming conventions of the fixture tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureLayout {
    /// Extension of the input document, without the dot
    pub document_extension: String,
    /// Suffix of the expected-output directory
    pub output_suffix: String,
    /// Suffix marking a disabled fixture
    pub disabled_suffix: String,
    /// Per-test configuration file name
    pub test_config_file: String,
    /// Namespace of the plugin section inside the per-test config
    pub plugin_namespace: String,
    /// Optional output directory of the secondary verifier
    pub verifier_asset_dir: String,
    /// Log file excluded from pixel comparison
    pub log_file: String,
}

impl Default for FixtureLayout {
    fn default() -> Self {
        Self {
            document_extension: DOCUMENT_EXTENSION.to_string(),
            output_suffix: OUTPUT_DIR_SUFFIX.to_string(),
            disabled_suffix: DISABLED_DIR_SUFFIX.to_string(),
            test_config_file: TEST_CONFIG_FILE.to_string(),
            plugin_namespace: ASSETS_PLUGIN_ID.to_string(),
            verifier_asset_dir: VERIFIER_ASSET_DIR.to_string(),
            log_file: GENERATION_LOG_FILE.to_string(),
        }
    }
}

impl FixtureLayout {
    /// Whether a directory name carries the disabled suffix
    ///
    /// A name that *is* the suffix is not considered disabled.
    #[must_use]
    pub fn is_disabled(&self, dir_name: &str) -> bool {
        dir_name.len() > self.disabled_suffix.len() && dir_name.ends_with(&self.disabled_suffix)
    }

    /// Whether a file name is a fixture document
    #[must_use]
    pub fn is_document(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.document_extension))
    }

    /// Expected-output directory name for a document
    #[must_use]
    pub fn output_dir_for(&self, document: &str) -> String {
        let stem = Path::new(document)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(document);
        format!("{stem}{}", self.output_suffix)
    }
}

/// Run-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunConfig {
    /// Root directory holding one subdirectory per test case
    pub fixture_root: PathBuf,
    /// Allow-list of test names; `None` selects every test
    pub selected_tests: Option<Vec<String>>,
    /// Overlay test configs on the plugin's existing config instead of replacing it
    pub honor_generator_assets_config: bool,
    /// Persistent root for working directories instead of temporary ones
    pub working_directory: Option<PathBuf>,
    /// Delete working directories after each test
    pub cleanup: bool,
    /// Start a run immediately instead of waiting for a host trigger
    pub autorun: bool,
    /// Destination of the xUnit report
    pub results_xml_path: Option<PathBuf>,
    /// Destination of the plain-text summary
    pub results_log_path: Option<PathBuf>,
    /// External pixel-difference executable
    pub pixel_tool: Option<PathBuf>,
    /// Interval between plugin lookups in milliseconds
    pub plugin_poll_interval_ms: u64,
    /// Acquisition window for plugin handles in milliseconds
    pub plugin_timeout_ms: u64,
    /// Order in which queued comparison jobs replace finished ones
    pub replenish_order: ReplenishOrder,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fixture_root: PathBuf::from("test"),
            selected_tests: None,
            honor_generator_assets_config: false,
            working_directory: None,
            cleanup: true,
            autorun: false,
            results_xml_path: None,
            results_log_path: None,
            pixel_tool: None,
            plugin_poll_interval_ms: DEFAULT_PLUGIN_POLL_INTERVAL_MS,
            plugin_timeout_ms: DEFAULT_PLUGIN_TIMEOUT_MS,
            replenish_order: ReplenishOrder::Fifo,
        }
    }
}

impl RunConfig {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Load configuration from a `.json`, `.yaml` or `.yml` file
    ///
    /// Missing keys take their defaults.
    pub async fn load(path: &Path) -> FixturistResult<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            FixturistError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml_str(&text)
        } else {
            Self::from_json_str(&text)
        }
    }

    /// Parse configuration from JSON text
    pub fn from_json_str(text: &str) -> FixturistResult<Self> {
        serde_json::from_str(text).map_err(|e| FixturistError::config(format!("invalid JSON: {e}")))
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(text: &str) -> FixturistResult<Self> {
        serde_yaml_ng::from_str(text)
            .map_err(|e| FixturistError::config(format!("invalid YAML: {e}")))
    }

    /// Whether a test name passes the selection filter
    #[must_use]
    pub fn is_selected(&self, name: &str) -> bool {
        self.selected_tests
            .as_ref()
            .map_or(true, |selected| selected.iter().any(|s| s == name))
    }

    /// Plugin lookup interval
    #[must_use]
    pub const fn plugin_poll_interval(&self) -> Duration {
        Duration::from_millis(self.plugin_poll_interval_ms)
    }

    /// Plugin acquisition window
    #[must_use]
    pub const fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }
}

/// Builder for [`RunConfig`]
#[derive(Debug, Clone, Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    /// Set the fixture root
    #[must_use]
    pub fn fixture_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.fixture_root = root.into();
        self
    }

    /// Restrict the run to the named tests
    #[must_use]
    pub fn selected_tests<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.selected_tests = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Keep the plugin's existing configuration underneath test overrides
    #[must_use]
    pub fn honor_generator_assets_config(mut self, honor: bool) -> Self {
        self.config.honor_generator_assets_config = honor;
        self
    }

    /// Use persistent working directories under `dir`
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_directory = Some(dir.into());
        self
    }

    /// Enable/disable working directory cleanup
    #[must_use]
    pub fn cleanup(mut self, enabled: bool) -> Self {
        self.config.cleanup = enabled;
        self
    }

    /// Enable/disable autorun
    #[must_use]
    pub fn autorun(mut self, enabled: bool) -> Self {
        self.config.autorun = enabled;
        self
    }

    /// Write the xUnit report to `path`
    #[must_use]
    pub fn results_xml_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.results_xml_path = Some(path.into());
        self
    }

    /// Write the plain-text summary to `path`
    #[must_use]
    pub fn results_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.results_log_path = Some(path.into());
        self
    }

    /// Use a specific pixel-difference executable
    #[must_use]
    pub fn pixel_tool(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pixel_tool = Some(path.into());
        self
    }

    /// Set plugin lookup interval and acquisition window
    #[must_use]
    pub fn plugin_acquisition(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.config.plugin_poll_interval_ms = poll_interval.as_millis() as u64;
        self.config.plugin_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the comparison queue replenishment order
    #[must_use]
    pub fn replenish_order(mut self, order: ReplenishOrder) -> Self {
        self.config.replenish_order = order;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> RunConfig {
        self.config
    }
}

/// Per-test configuration: the plugin section of `generator.json`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestConfig {
    section: PluginConfig,
}

impl TestConfig {
    /// Key holding the per-test comparison threshold
    pub const MAX_COMPARE_METRIC_KEY: &'static str = "max-compare-metric";

    /// Wrap an already extracted plugin section
    #[must_use]
    pub fn new(section: PluginConfig) -> Self {
        Self { section }
    }

    /// Extract the `namespace` section from a config document
    ///
    /// A document without the namespace, or whose namespace is not an
    /// object, yields an empty section.
    pub fn from_json_str(text: &str, namespace: &str) -> FixturistResult<Self> {
        let document: serde_json::Value = serde_json::from_str(text)?;
        let section = match document.get(namespace) {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => PluginConfig::new(),
        };
        Ok(Self { section })
    }

    /// Load the per-test config file, tolerating absence and parse errors
    ///
    /// Neither a missing file nor an unparsable one is fatal: both yield an
    /// empty section, the latter with a warning.
    pub async fn load(path: &Path, namespace: &str) -> Self {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Self::default(),
        }
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unable to read test config");
                return Self::default();
            }
        };
        Self::from_json_str(&text, namespace).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "unable to parse test config");
            Self::default()
        })
    }

    /// Comparison threshold for this test
    #[must_use]
    pub fn max_compare_metric(&self) -> f64 {
        self.section
            .get(Self::MAX_COMPARE_METRIC_KEY)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(DEFAULT_MAX_COMPARE_METRIC)
    }

    /// Borrow the plugin section
    #[must_use]
    pub const fn section(&self) -> &PluginConfig {
        &self.section
    }

    /// Take the plugin section
    #[must_use]
    pub fn into_section(self) -> PluginConfig {
        self.section
    }
}
