use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use physio_tidy::config::{Config, OutputFormat};
use physio_tidy::jobs::{self, JobOutcome};

#[derive(Debug, Parser)]
#[command(
    name = "physio-tidy",
    version,
    about = "Convert WESAD, SWELL and AffectiveROAD raw exports into tidy tables"
)]
struct Cli {
    /// JSON configuration file; missing fields take their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root of the raw dataset tree
    #[arg(long, global = true)]
    raw_dir: Option<PathBuf>,

    /// Directory the tidy tables are written to
    #[arg(long, global = true)]
    clean_dir: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    format: Option<OutputFormat>,

    /// Rebuild outputs that would otherwise be reused (SWELL)
    #[arg(long, global = true)]
    force: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Run every dataset job (default)
    All,
    Wesad,
    Swell,
    Road,
    /// Print the default configuration as JSON
    ExampleConfig,
}

type Job = fn(&Config) -> JobOutcome;

/// Dataset jobs in run order.
static JOBS: [(&str, Job); 3] = [
    (jobs::wesad::DATASET, jobs::wesad::run),
    (jobs::swell::DATASET, jobs::swell::run),
    (jobs::road::DATASET, jobs::road::run),
];

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

/// Ok(true) when at least one dataset table exists after the run.
fn run(cli: Cli) -> Result<bool> {
    let command = cli.command.unwrap_or(Command::All);
    if let Command::ExampleConfig = command {
        println!("{}", serde_json::to_string_pretty(&Config::default())?);
        return Ok(true);
    }

    let config = resolve_config(&cli)?;
    info!(
        "reading from {}, writing {} tables to {}",
        config.raw_dir.display(),
        config.format.extension(),
        config.clean_dir.display()
    );

    let selected: &[(&str, Job)] = match command {
        Command::Wesad => &JOBS[0..1],
        Command::Swell => &JOBS[1..2],
        Command::Road => &JOBS[2..3],
        _ => &JOBS,
    };

    let mut produced = 0;
    for (dataset, job) in selected {
        info!("=== {dataset} ===");
        let outcome = job(&config);
        outcome.log_summary(dataset);
        if outcome.produced() {
            produced += 1;
        }
    }
    info!("{produced} of {} datasets available in {}", selected.len(), config.clean_dir.display());

    Ok(produced > 0)
}

/// Config file first, then command-line overrides.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(raw_dir) = &cli.raw_dir {
        config.raw_dir = raw_dir.clone();
    }
    if let Some(clean_dir) = &cli.clean_dir {
        config.clean_dir = clean_dir.clone();
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    if cli.force {
        config.swell.skip_existing = false;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}
