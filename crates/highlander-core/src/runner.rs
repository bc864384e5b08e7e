//! Bounded headless runs with periodic conservation checkpoints.
//!
//! [`run_simulation`] lets a started [`Population`] fight and, every
//! `checkpoint_interval_ms`, pauses it, waits for quiescence, verifies
//! health conservation, and resumes. The run ends when:
//!
//! - **Duration**: `duration_ms` elapsed (zero means no limit)
//! - **Last immortal standing**: every loop ended with at most one survivor
//! - **Operator stop**: the caller's cancel future resolved
//!
//! Every immortal is then stopped and joined before the report is built.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use highlander_agents::{ImmortalId, Phase};

use crate::config::RunConfig;
use crate::conservation::{ConservationResult, HealthAnomaly};
use crate::controller::{ControllerError, FieldOutcome, Population, PopulationStats};

/// Errors that can occur during a run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A controller operation failed.
    #[error("controller error: {source}")]
    Controller {
        /// The underlying controller error.
        #[from]
        source: ControllerError,
    },
}

/// Reason a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEndReason {
    /// The configured duration elapsed.
    DurationElapsed,
    /// Every loop ended and at most one immortal remains.
    LastImmortalStanding,
    /// The operator cancelled the run.
    OperatorStop,
}

/// Final state of one registered immortal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Survivor {
    /// The immortal's id.
    pub id: ImmortalId,
    /// Display name.
    pub name: String,
    /// Final health.
    pub health: i64,
    /// Blows landed over the whole run.
    pub strikes: u64,
    /// Terminal phase.
    pub phase: Phase,
}

/// JSON-serializable summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Why the run ended.
    pub end_reason: RunEndReason,
    /// Checkpoints completed.
    pub checkpoints: u64,
    /// Conservation violations seen at checkpoints.
    pub anomalies: Vec<HealthAnomaly>,
    /// Conservation after every loop ended.
    pub final_conservation: ConservationResult,
    /// Population statistics after every loop ended.
    pub final_stats: PopulationStats,
    /// Immortals still registered at the end.
    pub survivors: Vec<Survivor>,
}

/// Run a started population until a termination condition is met.
///
/// `cancel` is the operator's stop signal, typically `tokio::signal::ctrl_c`
/// mapped to `()`. Pass [`std::future::pending`] for none.
///
/// # Errors
///
/// Returns [`RunnerError::Controller`] if a checkpoint or the final join
/// times out, or if an immortal's task failed. Every immortal is stopped and
/// the registry is cleared on failure too.
pub async fn run_simulation<F>(
    population: &Population,
    run: &RunConfig,
    cancel: F,
) -> Result<RunReport, RunnerError>
where
    F: Future<Output = ()>,
{
    let settle_timeout = Duration::from_millis(run.quiescence_timeout_ms);
    let duration_ms = run.duration_ms;
    let limit = async move {
        if duration_ms == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        }
    };
    tokio::pin!(limit);
    tokio::pin!(cancel);

    let mut ticker = tokio::time::interval(Duration::from_millis(run.checkpoint_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    info!(
        duration_ms = run.duration_ms,
        checkpoint_interval_ms = run.checkpoint_interval_ms,
        immortals = population.immortals().len(),
        "Run starting"
    );

    let mut checkpoints: u64 = 0;
    let mut anomalies = Vec::new();

    let ended = loop {
        tokio::select! {
            () = &mut cancel => {
                info!("Operator stop requested");
                break Ok(RunEndReason::OperatorStop);
            }
            () = &mut limit => {
                info!(duration_ms, "Run duration elapsed");
                break Ok(RunEndReason::DurationElapsed);
            }
            outcome = population.await_last_standing() => {
                if let FieldOutcome::Halted { registered } = outcome {
                    info!(registered, "Every loop was stopped outside the run");
                    break Ok(RunEndReason::OperatorStop);
                }
                info!(survivors = population.survivors().len(), "Last immortal standing");
                break Ok(RunEndReason::LastImmortalStanding);
            }
            _ = ticker.tick() => {
                match checkpoint(population, settle_timeout).await {
                    Ok(result) => {
                        checkpoints = checkpoints.saturating_add(1);
                        if let ConservationResult::Anomaly(anomaly) = result {
                            anomalies.push(anomaly);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        }
    };

    population.stop();
    let joined = population.join_timeout(settle_timeout).await;
    let end_reason = match ended.and_then(|reason| joined.map(|_| reason).map_err(RunnerError::from)) {
        Ok(reason) => reason,
        Err(e) => {
            warn!(error = %e, "Run failed, tearing down");
            population.teardown();
            return Err(e);
        }
    };

    let final_conservation = population.verify_conservation();
    let final_stats = population.stats();
    let survivors = population
        .survivors()
        .iter()
        .map(|immortal| Survivor {
            id: immortal.id(),
            name: immortal.display_name().to_owned(),
            health: immortal.current_health(),
            strikes: immortal.strikes(),
            phase: immortal.phase(),
        })
        .collect();
    population.teardown();

    Ok(RunReport {
        end_reason,
        checkpoints,
        anomalies,
        final_conservation,
        final_stats,
        survivors,
    })
}

/// Pause, settle, verify, resume.
///
/// The population is resumed even when settling times out; the snapshot is
/// still taken because it is consistent without quiescence.
async fn checkpoint(
    population: &Population,
    settle_timeout: Duration,
) -> Result<ConservationResult, RunnerError> {
    population.pause();
    let settled = population.await_quiescence_timeout(settle_timeout).await;
    let result = population.verify_conservation();
    population.resume();
    settled?;

    info!(
        health_sum = population.snapshot_health_sum(),
        survivors = population.survivors().len(),
        balanced = result.is_balanced(),
        "Checkpoint"
    );
    Ok(result)
}

/// Log the end of a run.
pub fn log_run_end(report: &RunReport) {
    info!(
        reason = ?report.end_reason,
        checkpoints = report.checkpoints,
        fights = report.final_stats.tally.fights,
        deaths = report.final_stats.tally.deaths,
        health_sum = report.final_stats.health_sum,
        expected_health_sum = report.final_stats.expected_health_sum,
        "Run ended"
    );

    for survivor in &report.survivors {
        info!(
            immortal = %survivor.id,
            name = %survivor.name,
            health = survivor.health,
            strikes = survivor.strikes,
            "Survivor"
        );
    }

    if !report.anomalies.is_empty() || !report.final_conservation.is_balanced() {
        warn!(
            anomalies = report.anomalies.len(),
            "Health conservation was violated during the run"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use highlander_agents::{CombatReport, NullSink, ReportSink, SinkError};

    use super::*;
    use crate::config::SimulationConfig;

    fn config(size: u32, health: i64, duration_ms: u64) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.population.size = size;
        config.population.initial_health = health;
        config.pacing.yield_ms = 0;
        config.seed = Some(11);
        config.run = RunConfig {
            duration_ms,
            checkpoint_interval_ms: 10,
            quiescence_timeout_ms: 5_000,
        };
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn duration_bounded_run_stays_balanced() {
        let config = config(4, 1_000_000, 60);
        let population = Population::spawn(config.clone(), Arc::new(NullSink)).unwrap();

        let report = run_simulation(&population, &config.run, std::future::pending())
            .await
            .unwrap();

        assert_eq!(report.end_reason, RunEndReason::DurationElapsed);
        assert!(report.checkpoints >= 1);
        assert!(report.anomalies.is_empty());
        assert!(report.final_conservation.is_balanced());
        assert_eq!(report.final_stats.health_sum, 4_000_000);
        assert_eq!(report.final_stats.running, 0);
        assert_eq!(report.survivors.len(), 4);
        assert!(population.survivors().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unbounded_run_ends_with_last_immortal_standing() {
        let config = config(3, 20, 0);
        let population = Population::spawn(config.clone(), Arc::new(NullSink)).unwrap();

        let report = tokio::time::timeout(
            Duration::from_secs(30),
            run_simulation(&population, &config.run, std::future::pending()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.end_reason, RunEndReason::LastImmortalStanding);
        assert_eq!(report.survivors.len(), 1);
        assert_eq!(report.survivors[0].health, 60);
        assert_eq!(report.survivors[0].phase, Phase::Stopped);
        assert_eq!(report.final_stats.dead, 2);
        assert_eq!(report.final_stats.tally.deaths, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_ends_the_run() {
        let config = config(3, 1_000_000, 0);
        let population = Population::spawn(config.clone(), Arc::new(NullSink)).unwrap();

        let cancel = tokio::time::sleep(Duration::from_millis(30));
        let report = run_simulation(&population, &config.run, cancel).await.unwrap();

        assert_eq!(report.end_reason, RunEndReason::OperatorStop);
        assert!(report.final_conservation.is_balanced());
        assert_eq!(report.final_stats.stopped, 3);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("OperatorStop"));
    }

    /// Blocks the reporting loop long enough to outlast the settle timeout.
    struct StallingSink;

    impl ReportSink for StallingSink {
        fn process_report(&self, _report: &CombatReport) -> Result<(), SinkError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_final_join_still_clears_the_registry() {
        let mut config = config(2, 1_000_000, 30);
        config.run.checkpoint_interval_ms = 60_000;
        config.run.quiescence_timeout_ms = 20;
        let population = Population::spawn(config.clone(), Arc::new(StallingSink)).unwrap();

        let result = run_simulation(&population, &config.run, std::future::pending()).await;

        assert!(matches!(
            result,
            Err(RunnerError::Controller {
                source: ControllerError::QuiescenceTimeout { .. }
            })
        ));
        assert!(population.survivors().is_empty());
        assert!(population.immortals().iter().all(|i| i.is_stop_requested()));
        population.join_timeout(Duration::from_secs(5)).await.unwrap();
    }
}
