//! CLI subcommand handlers.

use crate::console::ConsoleObserver;
use crate::{Commands, ConfigAction, GridArgs, RunArgs};
use gridtrack_core::config::{DatasetSource, FailurePolicy, SweepConfig, load_config};
use gridtrack_core::sweep::{GridDimension, SweepDriver, SweepPlanner, SweepSummary};
use gridtrack_ml::{DatasetProvider, LogisticTrialRunner, provider_from_config};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub workspace: PathBuf,
    pub config: Option<PathBuf>,
    pub quiet: bool,
}

impl Invocation {
    fn load_config(&self) -> anyhow::Result<SweepConfig> {
        load_config(Some(&self.workspace), self.config.as_deref())
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, invocation: &Invocation) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => handle_run(args, invocation).await.map(|_| ()),
        Commands::Plan(args) => handle_plan(&args, invocation).await,
        Commands::Config { action } => handle_config(action, invocation).await,
    }
}

async fn handle_run(args: RunArgs, invocation: &Invocation) -> anyhow::Result<SweepSummary> {
    let mut config = invocation.load_config()?;
    apply_run_overrides(&mut config, &args, &invocation.workspace)?;

    let provider = provider_from_config(&config.dataset);
    tracing::info!(dataset = %provider.describe(), "Loading dataset");
    let split = tokio::task::spawn_blocking(move || provider.get_split())
        .await?
        .map_err(|e| anyhow::anyhow!("Failed to load dataset: {}", e))?;

    let runner = Arc::new(LogisticTrialRunner::new(Arc::new(split), &config.model));
    let driver = SweepDriver::from_config(&config, runner)?
        .with_observer(Arc::new(ConsoleObserver::new(invocation.quiet)));
    let summary = driver.run(&SweepPlanner::new(config.grid.clone())).await?;
    Ok(summary)
}

async fn handle_plan(args: &GridArgs, invocation: &Invocation) -> anyhow::Result<()> {
    let mut config = invocation.load_config()?;
    apply_grid(&mut config, args)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid grid: {}", e))?;
    for line in plan_lines(&SweepPlanner::new(config.grid)) {
        println!("{line}");
    }
    Ok(())
}

async fn handle_config(action: ConfigAction, invocation: &Invocation) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = invocation.workspace.join(".gridtrack");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&SweepConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = invocation.load_config()?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn apply_grid(config: &mut SweepConfig, args: &GridArgs) -> anyhow::Result<()> {
    for entry in &args.grid {
        config.grid.set_dimension(GridDimension::parse(entry)?);
    }
    Ok(())
}

/// Layer command-line flags over the loaded configuration.
///
/// Relative output and dataset paths are taken from the workspace, not the
/// process working directory.
fn apply_run_overrides(
    config: &mut SweepConfig,
    args: &RunArgs,
    workspace: &Path,
) -> anyhow::Result<()> {
    apply_grid(config, &args.grid)?;
    if let Some(experiment) = &args.experiment {
        config.experiment_name = experiment.clone();
    }
    if let Some(uri) = &args.tracking_uri {
        config.tracking.uri = uri.clone();
    }
    match (&args.dataset, &args.label_column) {
        (Some(path), label) => {
            config.dataset.source = DatasetSource::Csv {
                path: path.clone(),
                label_column: label.clone().unwrap_or_else(|| "label".to_string()),
                delimiter: ',',
            };
        }
        (None, Some(label)) => match &mut config.dataset.source {
            DatasetSource::Csv { label_column, .. } => *label_column = label.clone(),
            DatasetSource::Blobs { .. } => {
                anyhow::bail!("--label-column needs a CSV dataset (pass --dataset)")
            }
        },
        (None, None) => {}
    }
    if let Some(parallel) = args.parallel {
        config.execution.max_parallel_trials = parallel;
    }
    if args.no_push {
        config.gateway.enabled = false;
    }
    if args.continue_on_failure {
        config.execution.on_trial_failure = FailurePolicy::Continue;
    }
    anchor_paths(config, workspace);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))
}

fn anchor_paths(config: &mut SweepConfig, workspace: &Path) {
    let anchor = |path: &mut PathBuf| {
        if path.is_relative() {
            *path = workspace.join(&*path);
        }
    };
    anchor(&mut config.output.best_model_dir);
    if let Some(summary) = config.output.summary_path.as_mut() {
        anchor(summary);
    }
    if let DatasetSource::Csv { path, .. } = &mut config.dataset.source {
        anchor(path);
    }
}

fn plan_lines(planner: &SweepPlanner) -> Vec<String> {
    let mut lines: Vec<String> = planner
        .iter()
        .map(|trial| format!("{:>4}  {}", trial.index, trial.label()))
        .collect();
    lines.push(format!("{} trial configurations", planner.len()));
    lines
}
