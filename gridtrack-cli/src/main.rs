//! gridtrack CLI: run and inspect hyperparameter grid sweeps.
//!
//! With no subcommand the configured sweep is run as-is.

mod commands;
mod console;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// gridtrack: grid sweeps tracked in MLflow, metrics pushed to Prometheus
#[derive(Parser, Debug)]
#[command(name = "gridtrack", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.gridtrack/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress per-trial progress output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the sweep
    Run(RunArgs),
    /// Print the trial configurations without running them
    Plan(GridArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default, Clone)]
struct GridArgs {
    /// Replace or add a grid dimension: NAME=V1,V2,... (repeatable)
    #[arg(short, long = "grid", value_name = "NAME=VALUES")]
    grid: Vec<String>,
}

#[derive(clap::Args, Debug, Default, Clone)]
struct RunArgs {
    #[command(flatten)]
    grid: GridArgs,

    /// MLflow experiment name
    #[arg(short, long)]
    experiment: Option<String>,

    /// Tracking URI (`http(s)://...`, `file://...` or a directory)
    #[arg(long)]
    tracking_uri: Option<String>,

    /// Train on a CSV file instead of the configured dataset
    #[arg(long, value_name = "PATH")]
    dataset: Option<PathBuf>,

    /// Label column of the CSV dataset
    #[arg(long)]
    label_column: Option<String>,

    /// Number of trials in flight at once
    #[arg(short, long)]
    parallel: Option<usize>,

    /// Skip pushing metrics to the Pushgateway
    #[arg(long)]
    no_push: bool,

    /// Keep going when a trial fails
    #[arg(long)]
    continue_on_failure: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to `.gridtrack/config.toml`
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "gridtrack", "gridtrack")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "gridtrack.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let invocation = commands::Invocation {
        workspace,
        config: cli.config,
        quiet: cli.quiet,
    };
    let command = cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default()));
    commands::handle_command(command, &invocation).await
}
