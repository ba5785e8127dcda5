//! Session plumbing for `mcl-sim`: logging, the output directory, and the per-run and summary
//! CSV files written into it.

use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};

use mcl::sim::SimulationResult;

/// Resolve a `--log-level` value, falling back to `info` for anything unrecognized.
pub fn parse_log_level(log_level: &str) -> log::LevelFilter {
    log_level.parse().unwrap_or_else(|_| {
        eprintln!("mcl-sim: unknown log level '{log_level}' (expected off, error, warn, info, debug or trace), using 'info'");
        log::LevelFilter::Info
    })
}

/// Install the global logger for a simulation session.
///
/// Lines are `timestamp [LEVEL] - message`. At `debug` the filter reports one line per tick,
/// at `trace` one more per resample, so long batch runs are usually logged to `log_file`
/// (appended to, parent directories created) instead of stderr.
///
/// # Errors
/// Fails if the log file cannot be opened or a logger is already installed.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(parse_log_level(log_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        });

    if let Some(path) = log_file {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("cannot open log file '{}': {e}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder
        .try_init()
        .map_err(|e| format!("logger already initialized for this session: {e}"))?;
    Ok(())
}

/// Validate the output directory, creating it if it does not exist.
///
/// # Errors
/// Returns an error if the path exists but is not a directory, or if creation fails.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.exists() && !output.is_dir() {
        return Err(format!("Output path '{}' is not a directory.", output.display()).into());
    }
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }
    Ok(())
}

/// Path of the per-run record file for `seed` inside `output`.
pub fn run_output_path(output: &Path, seed: u64) -> PathBuf {
    output.join(format!("run_{seed}.csv"))
}

/// One row of the batch summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub seed: u64,
    pub ticks: usize,
    pub mean_error: Option<f64>,
    pub final_error: Option<f64>,
    pub mean_confidence: f64,
}

impl From<&SimulationResult> for RunSummary {
    fn from(result: &SimulationResult) -> Self {
        RunSummary {
            seed: result.seed,
            ticks: result.records.len(),
            mean_error: result.mean_error(),
            final_error: result.final_error(),
            mean_confidence: result.mean_confidence(),
        }
    }
}

/// Write one summary row per run, ordered by seed.
pub fn write_summary(path: &Path, results: &[SimulationResult]) -> Result<(), Box<dyn Error>> {
    let mut rows: Vec<RunSummary> = results.iter().map(RunSummary::from).collect();
    rows.sort_by_key(|row| row.seed);
    let mut writer = csv::Writer::from_path(path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
