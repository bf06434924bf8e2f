//! Compare command handler
//!
//! Runs only the comparison stage of the pipeline against a working
//! directory that was generated earlier, so no host is needed.

use crate::commands::CompareArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use fixturist::discovery::inspect_test_dir;
use fixturist::{CompareStage, FixtureLayout, ImageMagickComparator, TestConfig, TestResult};
use std::sync::Arc;

/// Execute the compare command
pub async fn execute_compare(config: &CliConfig, args: &CompareArgs) -> CliResult<()> {
    let layout = FixtureLayout::default();
    let result = compare_dirs(args, &layout).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let reporter =
            ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
        if config.verbosity.is_verbose() {
            for comparison in &result.comparisons {
                reporter.detail(&format!("{}: {}", comparison.file, comparison.metric));
            }
        }
        reporter.test_result(&result);
    }

    if result.passed {
        Ok(())
    } else {
        Err(CliError::TestsFailed {
            failed: 1,
            total: 1,
        })
    }
}

/// Compare the fixture's expected outputs with a working directory
pub async fn compare_dirs(args: &CompareArgs, layout: &FixtureLayout) -> CliResult<TestResult> {
    let case = inspect_test_dir(&args.fixture_dir, layout)
        .await?
        .ok_or_else(|| {
            CliError::invalid_argument(format!(
                "{} holds no document with a matching output directory",
                args.fixture_dir.display()
            ))
        })?;

    let threshold = match args.threshold {
        Some(threshold) => threshold,
        None => {
            let path = case.base_dir.join(&layout.test_config_file);
            TestConfig::load(&path, &layout.plugin_namespace)
                .await
                .max_compare_metric()
        }
    };

    let mut subdirs = vec![case.output.clone()];
    if args.with_verifier_assets {
        subdirs.push(layout.verifier_asset_dir.clone());
    }

    let comparator = args
        .pixel_tool
        .clone()
        .map_or_else(ImageMagickComparator::default, ImageMagickComparator::new);
    let stage = CompareStage::new(Arc::new(comparator), layout);
    let result = stage
        .run(&case.name, &case.base_dir, &args.working_dir, &subdirs, threshold)
        .await?;
    Ok(result)
}
