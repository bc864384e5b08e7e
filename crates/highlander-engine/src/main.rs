//! Headless runner binary for the Highlander simulation.
//!
//! Loads configuration, spawns the population, runs it until the duration
//! elapses, one immortal remains, or Ctrl-C is pressed, and prints the run
//! report as JSON on stdout.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `HIGHLANDER_CONFIG` or `highlander-config.yaml`
//! 2. Apply `HIGHLANDER_POPULATION` / `HIGHLANDER_SEED` overrides and validate
//! 3. Initialize structured logging (tracing)
//! 4. Build the report sink
//! 5. Spawn one task per immortal
//! 6. Run with periodic conservation checkpoints
//! 7. Log and print the result

mod error;
mod sinks;

use std::path::PathBuf;

use highlander_core::{Population, SimulationConfig, log_run_end, run_simulation};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::sinks::ReportPipeline;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "highlander-config.yaml";

/// Environment variable naming an alternative configuration file.
const ENV_CONFIG_PATH: &str = "HIGHLANDER_CONFIG";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the population cannot be
/// started, or the run fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1-2. Configuration comes first so it can pick the log level.
    let config = load_config()?;

    // 3. Initialize structured logging. Logs go to stderr; stdout carries
    //    only the JSON run report.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("highlander-engine starting");
    info!(
        size = config.population.size,
        initial_health = config.population.initial_health,
        damage = config.population.damage,
        seed = ?config.seed,
        sink = ?config.report.sink,
        "Configuration loaded"
    );

    // 4. Report sink.
    let pipeline = ReportPipeline::build(&config.report);

    // 5. Spawn.
    let run = config.run.clone();
    let population = Population::spawn(config, pipeline.sink()).map_err(EngineError::from)?;

    // 6. Run.
    let report = run_simulation(&population, &run, operator_stop())
        .await
        .map_err(EngineError::from)?;

    // 7. Log and print.
    log_run_end(&report);
    let json = serde_json::to_string_pretty(&report).map_err(EngineError::from)?;
    println!("{json}");

    drop(population);
    pipeline.finish().await;

    info!(end_reason = ?report.end_reason, "highlander-engine shutdown complete");
    Ok(())
}

/// Load configuration, apply environment overrides, and validate.
fn load_config() -> Result<SimulationConfig, EngineError> {
    let path = std::env::var_os(ENV_CONFIG_PATH)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    let mut config = if path.exists() {
        SimulationConfig::from_file(&path)?
    } else {
        SimulationConfig::default()
    };
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Resolves when the operator presses Ctrl-C.
///
/// If the signal handler cannot be installed the run continues without it.
async fn operator_stop() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler unavailable, run ends only on its own");
        std::future::pending::<()>().await;
    }
}
