//! # Trial Syncer CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - configuration loading and validation
//! - pipeline orchestration and lifecycle management
//! - graceful shutdown handling
//!
//! Exit codes: 0 on success, 1 on gui errors, 2 on convert/graph/validate
//! errors (config problems and fatal sink errors included).

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::Layer;

use trial_syncer::cli::{Cli, Commands, LogFormat};
use trial_syncer::commands::{run_convert, run_graph, run_gui, run_validate};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::from(2);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Trial Syncer starting");

    let (result, failure_code) = match &cli.command {
        Commands::Convert(args) => (run_convert(args).await, 2),
        Commands::Gui(args) => (run_gui(args).await, 1),
        Commands::Graph(args) => (run_graph(args).await, 2),
        Commands::Validate(args) => (run_validate(args).await, 2),
    };

    match result {
        Ok(()) => {
            info!("OK");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = format!("{e:#}"), "completed with errors");
            ExitCode::from(failure_code)
        }
    }
}

/// Initialize logging based on CLI options
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else {
        let default_level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    let fmt_layer = match cli.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
