//! Fixturist CLI: regression tests for hosted asset-generation plugins
//!
//! ## Usage
//!
//! ```bash
//! fixturist run --host ./host-bridge -- --profile ci   # Run every fixture once
//! fixturist run --host ./host-bridge --serve           # Answer host run requests
//! fixturist list --fixtures test                       # Show qualifying tests
//! fixturist compare test/icons /tmp/work               # Re-check generated output
//! fixturist config -c fixturist.yaml                   # Print effective config
//! ```

use clap::Parser;
use fixturist_cli::{
    handlers, logging, Cli, CliConfig, CliResult, ColorChoice, Commands, LogFormat, Verbosity,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let config = build_config(&cli);
    logging::init_tracing(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Run(args) => runtime.block_on(handlers::execute_run(&config, &args)),
        Commands::List(args) => runtime.block_on(handlers::execute_list(&args)),
        Commands::Compare(args) => runtime.block_on(handlers::execute_compare(&config, &args)),
        Commands::Config(args) => runtime.block_on(handlers::execute_config(&args)),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        match cli.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    };

    let color: ColorChoice = cli.color.clone().into();
    let log_format: LogFormat = cli.log_format.clone().into();

    CliConfig::new()
        .with_verbosity(verbosity)
        .with_color(color)
        .with_log_format(log_format)
}
