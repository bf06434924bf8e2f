//! Command handlers
//!
//! Each handler module contains the execution logic for one CLI command.
//! Run configuration is resolved here: the configuration file first, then
//! the command-line overrides on top.

pub mod compare;
pub mod config;
pub mod list;
pub mod run;

pub use compare::execute_compare;
pub use config::execute_config;
pub use list::execute_list;
pub use run::execute_run;

use crate::commands::ConfigOverrides;
use crate::error::CliResult;
use fixturist::{ImageMagickComparator, RunConfig, RunReport};

/// Load the configuration file, if any, and apply the overrides
pub async fn resolve_run_config(overrides: &ConfigOverrides) -> CliResult<RunConfig> {
    let mut config = match &overrides.config {
        Some(path) => RunConfig::load(path).await?,
        None => RunConfig::default(),
    };
    apply_overrides(&mut config, overrides);
    Ok(config)
}

/// Apply command-line overrides to a loaded configuration
pub fn apply_overrides(config: &mut RunConfig, overrides: &ConfigOverrides) {
    if let Some(root) = &overrides.fixtures {
        config.fixture_root.clone_from(root);
    }
    if !overrides.select.is_empty() {
        config.selected_tests = Some(overrides.select.clone());
    }
    if overrides.no_cleanup {
        config.cleanup = false;
    }
    if let Some(dir) = &overrides.working_dir {
        config.working_directory = Some(dir.clone());
    }
    if let Some(path) = &overrides.xml {
        config.results_xml_path = Some(path.clone());
    }
    if let Some(path) = &overrides.log {
        config.results_log_path = Some(path.clone());
    }
    if overrides.honor_plugin_config {
        config.honor_generator_assets_config = true;
    }
    if let Some(tool) = &overrides.pixel_tool {
        config.pixel_tool = Some(tool.clone());
    }
}

/// Pixel comparator for the configured tool
#[must_use]
pub fn comparator_for(config: &RunConfig) -> ImageMagickComparator {
    config
        .pixel_tool
        .clone()
        .map_or_else(ImageMagickComparator::default, ImageMagickComparator::new)
}

/// Number of tests that did not pass across `reports`, and the number run
#[must_use]
pub fn unpassed(reports: &[RunReport]) -> (usize, usize) {
    reports.iter().fold((0, 0), |(failed, total), report| {
        (
            failed + report.total_count() - report.passed_count(),
            total + report.total_count(),
        )
    })
}
