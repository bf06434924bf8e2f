//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Fixturist: regression tests for asset-generation plugins running inside a host application
#[derive(Parser, Debug)]
#[command(name = "fixturist")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormatArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the fixtures through a host application
    Run(RunArgs),

    /// List the tests that would run
    List(ListArgs),

    /// Compare an already generated working directory against a fixture
    Compare(CompareArgs),

    /// Show the effective run configuration
    Config(ConfigArgs),
}

/// Run configuration file and per-key overrides, shared by every command
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Run configuration file (.json, .yaml or .yml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Fixture root directory
    #[arg(long)]
    pub fixtures: Option<PathBuf>,

    /// Only run this test (repeatable)
    #[arg(long = "select", value_name = "TEST")]
    pub select: Vec<String>,

    /// Keep working directories after each test
    #[arg(long)]
    pub no_cleanup: bool,

    /// Persistent root for working directories
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Write the xUnit report here
    #[arg(long)]
    pub xml: Option<PathBuf>,

    /// Write the plain-text summary here
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Overlay per-test plugin config on the plugin's current config
    #[arg(long)]
    pub honor_plugin_config: bool,

    /// Pixel-difference executable
    #[arg(long)]
    pub pixel_tool: Option<PathBuf>,
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Host bridge executable
    #[arg(long)]
    pub host: String,

    /// Arguments passed to the host bridge (after `--`)
    #[arg(last = true)]
    pub host_args: Vec<String>,

    /// Keep serving host run requests instead of running once
    #[arg(long)]
    pub serve: bool,

    /// Run configuration
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// Arguments for the list command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// Run configuration
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// Arguments for the compare command
#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Fixture directory holding the document and its expected outputs
    pub fixture_dir: PathBuf,

    /// Working directory holding the generated outputs
    pub working_dir: PathBuf,

    /// Maximum comparison metric (defaults to the fixture's own config)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Also compare the secondary verifier's asset directory
    #[arg(long)]
    pub with_verifier_assets: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Pixel-difference executable
    #[arg(long)]
    pub pixel_tool: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Run configuration
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Log format argument for CLI
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Text,
    /// JSON lines
    Json,
}

impl From<LogFormatArg> for crate::config::LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}
