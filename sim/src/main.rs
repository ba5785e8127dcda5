//! MCL SIM: a headless simulation tool for arena Monte Carlo localization.
//!
//! The robot drives a scripted path around a known rectangular arena while a particle filter
//! localizes it from odometry and range-sensor readings. Each run writes its per-tick records
//! to a CSV file, and batches of runs over consecutive seeds are summarized in `summary.csv`.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML)
//!   2. Starting from the built-in defaults and overriding parameters via command-line flags

mod common;

use clap::{Args, Parser, Subcommand};
use common::{init_logger, run_output_path, validate_output_path, write_summary};
use log::{error, info};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};

use mcl::config::SimulationConfig;
use mcl::likelihood::LikelihoodModel;
use mcl::sensor::{NoiseMode, ReadingNoise};
use mcl::sim::{SimulationResult, run_simulation};

const LONG_ABOUT: &str = "MCL SIM: a headless simulation tool for arena Monte Carlo localization.

A robot drives a scripted path around a known rectangular arena with circular obstacles. A
particle filter estimates its position from noisy odometry and noisy range-sensor readings.

Use `run` to simulate one or more seeds and `config` to write a template configuration file.
Configuration files may be TOML, JSON, or YAML; command-line flags override their values.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "A headless simulation tool for arena Monte Carlo localization.", long_about = LONG_ABOUT)]
struct Cli {
    /// Command to execute
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run one or more localization simulations",
        long_about = "Run localization simulations. Each run uses its own seed, starting at --seed (or the configuration's seed) and counting up. Per-run records are written to run_<seed>.csv in the output directory and a one-row-per-run summary is written to summary.csv."
    )]
    Run(RunArgs),

    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Configuration file (TOML/JSON/YAML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for run records and the summary
    #[arg(short, long, default_value = "mcl_output")]
    output: PathBuf,

    /// Number of runs
    #[arg(long, default_value_t = 1)]
    runs: u64,

    /// Seed of the first run
    #[arg(long)]
    seed: Option<u64>,

    /// Run simulations in parallel
    #[arg(long)]
    parallel: bool,

    /// Number of particles
    #[arg(long)]
    particles: Option<usize>,

    /// Number of ticks per run
    #[arg(long)]
    ticks: Option<usize>,

    /// Likelihood model used to weight particles
    #[arg(long, value_enum)]
    likelihood: Option<LikelihoodModel>,

    /// Shape of the sensor reading noise
    #[arg(long, value_enum)]
    noise_mode: Option<NoiseMode>,

    /// Whether readings reuse each sensor's calibration bias or draw fresh noise
    #[arg(long, value_enum)]
    reading_noise: Option<ReadingNoise>,

    /// Fraction of the population redrawn uniformly at every resample
    #[arg(long)]
    percent_random: Option<f64>,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output path; the extension (.toml, .json, .yaml) selects the format
    #[arg(short, long, default_value = "mcl_config.toml")]
    output: PathBuf,
}

/// Load the configuration for a run and apply the command-line overrides.
fn build_config(args: &RunArgs) -> Result<SimulationConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            SimulationConfig::from_file(path)?
        }
        None => SimulationConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(particles) = args.particles {
        config.particle_count = particles;
    }
    if let Some(ticks) = args.ticks {
        config.ticks = ticks;
    }
    if let Some(likelihood) = args.likelihood {
        config.filter.likelihood = likelihood;
    }
    if let Some(mode) = args.noise_mode {
        config.filter.noise_mode = mode;
    }
    if let Some(reading) = args.reading_noise {
        config.filter.reading_noise = reading;
    }
    if let Some(percent) = args.percent_random {
        config.filter.percent_random = percent;
    }
    config.validate()?;
    Ok(config)
}

/// Run one seed and write its records.
fn run_one(config: &SimulationConfig, seed: u64, output: &Path) -> Result<SimulationResult, String> {
    let mut config = config.clone();
    config.seed = seed;
    let result = run_simulation(&config).map_err(|e| format!("seed {seed}: {e}"))?;
    let path = run_output_path(output, seed);
    result
        .to_csv(&path)
        .map_err(|e| format!("seed {seed}: failed to write {}: {e}", path.display()))?;
    Ok(result)
}

fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    if args.runs == 0 {
        return Err("--runs must be at least 1".into());
    }
    let config = build_config(args)?;
    validate_output_path(&args.output)?;

    let seeds: Vec<u64> = (0..args.runs).map(|i| config.seed.wrapping_add(i)).collect();
    info!(
        "Running {} simulation(s) from seed {} ({} likelihood, {} noise){}",
        seeds.len(),
        config.seed,
        config.filter.likelihood,
        config.filter.noise_mode,
        if args.parallel { " in parallel" } else { "" }
    );

    // every run owns its filter; nothing is shared between threads but the configuration
    let outcomes: Vec<Result<SimulationResult, String>> = if args.parallel {
        seeds
            .par_iter()
            .map(|&seed| run_one(&config, seed, &args.output))
            .collect()
    } else {
        seeds
            .iter()
            .map(|&seed| run_one(&config, seed, &args.output))
            .collect()
    };

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                failures += 1;
                error!("{e}");
            }
        }
    }

    if !results.is_empty() {
        let summary = args.output.join("summary.csv");
        write_summary(&summary, &results)?;
        info!("Wrote summary of {} run(s) to {}", results.len(), summary.display());
    }
    if failures > 0 {
        return Err(format!("{failures} run(s) failed").into());
    }
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    let config = SimulationConfig::default();
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    config.to_file(&args.output)?;
    info!("Wrote template configuration to {}", args.output.display());
    println!("\nYou can now run the simulation with:");
    println!("  mcl-sim run --config {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match &cli.command {
        Command::Run(args) => run(args),
        Command::CreateConfig(args) => create_config_file(args),
    }
}
