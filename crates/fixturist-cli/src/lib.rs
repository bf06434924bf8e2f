//! Fixturist CLI Library
//!
//! Command-line interface for the Fixturist regression-test orchestrator.

#![warn(missing_docs)]
#![allow(clippy::format_push_string)] // String building is clear and correct

mod commands;
mod config;
mod error;
pub mod handlers;
pub mod logging;
mod output;

pub use commands::{
    Cli, ColorArg, Commands, CompareArgs, ConfigArgs, ConfigOverrides, ListArgs, LogFormatArg,
    RunArgs,
};
pub use config::{CliConfig, ColorChoice, LogFormat, Verbosity};
pub use error::{CliError, CliResult};
pub use output::ProgressReporter;
