//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Trial Syncer - synthesize neural and behavioral data streams into trials
#[derive(Parser, Debug)]
#[command(
    name = "trial-syncer",
    author,
    version,
    about = "Trial-partitioned synthesis of neural and behavioral data streams",
    long_about = "Reads multiple concurrent data sources, each with its own clock and \n\
                  native format, aligns them over a shared sliding window, partitions \n\
                  time into trials, and writes one record per trial to durable storage."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TRIAL_SYNCER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TRIAL_SYNCER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert sources to a trial file, as fast as the data allow
    Convert(ConvertArgs),

    /// Run interactively, pacing extraction and driving plotters
    Gui(GuiArgs),

    /// Emit a Graphviz DOT description of the configured pipeline
    Graph(GraphArgs),

    /// Validate the experiment configuration without running
    Validate(ValidateArgs),
}

/// Options shared by every mode that loads an experiment document.
#[derive(Parser, Debug, Clone)]
pub struct ExperimentArgs {
    /// Path to the experiment configuration document (TOML or JSON)
    #[arg(short, long, env = "TRIAL_SYNCER_EXPERIMENT")]
    pub experiment: PathBuf,

    /// Optional subject metadata document, merged into the experiment mapping
    #[arg(short, long)]
    pub subject: Option<PathBuf>,

    /// Reader arg overrides, keyed reader_name.arg_name=value
    #[arg(short, long, num_args = 1.., value_name = "NAME.ARG=VALUE")]
    pub readers: Vec<String>,

    /// Directories searched for config, data, and rules files
    #[arg(short = 'P', long, num_args = 1.., value_name = "DIR")]
    pub search_path: Vec<PathBuf>,
}

/// Arguments for the `convert` command
#[derive(Parser, Debug)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,

    /// Output trial file; the extension selects the format
    #[arg(short = 'f', long, env = "TRIAL_SYNCER_TRIAL_FILE")]
    pub trial_file: PathBuf,

    /// Prometheus metrics port (0 = disabled)
    #[arg(long, default_value = "0", env = "TRIAL_SYNCER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `gui` command
#[derive(Parser, Debug)]
pub struct GuiArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,

    /// Output trial file; the extension selects the format
    #[arg(short = 'f', long, env = "TRIAL_SYNCER_TRIAL_FILE")]
    pub trial_file: PathBuf,

    /// File where plot figure window positions persist between runs
    #[arg(short = 'p', long)]
    pub plot_positions: Option<PathBuf>,

    /// Plot update period in seconds
    #[arg(long, default_value = "0.025")]
    pub plot_update_period: f64,

    /// Prometheus metrics port (0 = disabled)
    #[arg(long, default_value = "0", env = "TRIAL_SYNCER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `graph` command
#[derive(Parser, Debug)]
pub struct GraphArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,

    /// Output DOT file describing readers, routes, buffers, and trials
    #[arg(short = 'g', long)]
    pub graph_file: PathBuf,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
