//! Config command handler

use super::resolve_run_config;
use crate::commands::ConfigArgs;
use crate::error::CliResult;

/// Execute the config command: print the effective run configuration as JSON
pub async fn execute_config(args: &ConfigArgs) -> CliResult<()> {
    let config = resolve_run_config(&args.overrides).await?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
