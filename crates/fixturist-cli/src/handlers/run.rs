//! Run command handler

use super::{comparator_for, resolve_run_config, unpassed};
use crate::commands::RunArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use fixturist::{HostBridge, Orchestrator, RunContext};
use std::sync::Arc;

/// Execute the run command
///
/// Without `--serve` the fixtures run exactly once and no summary alert is
/// sent to the host. With `--serve` the configured `autorun` applies and
/// the command keeps answering host run requests until the host exits.
pub async fn execute_run(config: &CliConfig, args: &RunArgs) -> CliResult<()> {
    let mut run_config = resolve_run_config(&args.overrides).await?;
    if !args.serve {
        run_config.autorun = true;
    }

    tracing::info!(
        host = %args.host,
        serve = args.serve,
        fixtures = %run_config.fixture_root.display(),
        "starting run"
    );
    let host = HostBridge::spawn(&args.host, &args.host_args)?;
    let comparator = comparator_for(&run_config);
    let reporter = Arc::new(ProgressReporter::new(
        config.color.should_color(),
        config.verbosity.is_quiet(),
    ));

    let ctx = RunContext::new(run_config, Arc::new(host), Arc::new(comparator));
    let orchestrator = Orchestrator::new(ctx).with_observer(reporter);

    let reports = if args.serve {
        orchestrator.serve().await?
    } else {
        vec![orchestrator.run_all().await?]
    };

    match unpassed(&reports) {
        (0, _) => Ok(()),
        (failed, total) => Err(CliError::TestsFailed { failed, total }),
    }
}
