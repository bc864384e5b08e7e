//! Lifecycle control for a whole population of immortals.
//!
//! A [`Population`] owns the immortals, the shared
//! [`Battleground`], and the join handles of every immortal's task. The
//! operator drives it with pause, resume, and stop, waits for quiescence,
//! and reads a consistent health sum.
//!
//! # Architecture
//!
//! Control requests are per-immortal atomic flags plus a
//! [`tokio::sync::Notify`], so broadcasting a pause never contends with
//! combat. Quiescence is observed through a [`tokio::sync::watch`] channel
//! carrying the running-immortal count; nothing polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use highlander_agents::{
    AgentError, Battleground, IdSequence, Immortal, ImmortalId, Phase, ReportSink, TallySnapshot,
    locked_health_sum, run_immortal,
};

use crate::config::{ConfigError, SimulationConfig};
use crate::conservation::{ConservationResult, verify_health_sum};

/// Shared handle to one immortal, for per-immortal queries.
pub type ImmortalHandle = Arc<Immortal>;

/// Errors that can occur while creating or controlling a population.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The configuration is invalid.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigError,
    },

    /// An immortal could not be created or registered.
    #[error("agent error: {source}")]
    Agent {
        /// The underlying agent error.
        #[from]
        source: AgentError,
    },

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available: {source}")]
    NoRuntime {
        /// The underlying runtime lookup error.
        #[from]
        source: tokio::runtime::TryCurrentError,
    },

    /// `start` was called twice.
    #[error("population already started")]
    AlreadyStarted,

    /// Immortals were still running when the wait gave up.
    #[error("{running} immortal(s) still running after {waited_ms}ms")]
    QuiescenceTimeout {
        /// Immortals still in the running phase.
        running: usize,
        /// How long the wait lasted.
        waited_ms: u64,
    },

    /// An immortal's task panicked or was cancelled.
    #[error("immortal task failed: {source}")]
    Join {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },
}

/// JSON-serializable snapshot of a population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationStats {
    /// Immortals ever created.
    pub population: usize,
    /// Immortals still in the registry.
    pub registered: usize,
    /// Immortals with positive health.
    pub alive: usize,
    /// Immortals whose loop has not started.
    pub pending: usize,
    /// Immortals currently fighting.
    pub running: usize,
    /// Immortals currently suspended.
    pub paused: usize,
    /// Immortals whose loop ended without dying.
    pub stopped: usize,
    /// Immortals whose loop ended in death.
    pub dead: usize,
    /// Combat totals.
    pub tally: TallySnapshot,
    /// Health summed over every immortal ever created.
    pub health_sum: i64,
    /// The conserved total, `N x H`.
    pub expected_health_sum: i64,
    /// Wall-clock start time, once started.
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since start.
    pub elapsed_seconds: u64,
}

/// How the field looked once every loop had ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOutcome {
    /// At most one immortal is left registered.
    LastStanding,
    /// Loops were stopped before a single survivor emerged.
    Halted {
        /// Immortals still registered.
        registered: usize,
    },
}

/// A population of immortals and the controls to drive it.
#[derive(Debug)]
pub struct Population {
    config: SimulationConfig,
    ground: Arc<Battleground>,
    /// Every immortal ever created, ascending by id.
    immortals: Vec<ImmortalHandle>,
    expected_health: i64,
    started: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    handles: Mutex<Vec<JoinHandle<Phase>>>,
}

impl Population {
    /// Validate `config` and create its immortals without starting them.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Config`] if the configuration is invalid,
    /// or [`ControllerError::Agent`] if an immortal cannot be created.
    pub fn new(config: SimulationConfig, sink: Arc<dyn ReportSink>) -> Result<Self, ControllerError> {
        config.validate()?;
        let population = &config.population;
        let expected_health = population.total_health().ok_or_else(|| ConfigError::Invalid {
            reason: "population health sum overflows i64".to_owned(),
        })?;

        let ids = IdSequence::new();
        let mut immortals = Vec::with_capacity(usize::try_from(population.size).unwrap_or(0));
        for _ in 0..population.size {
            let id = ids.next_id()?;
            let name = format!("{}{}", population.name_prefix, id.into_inner());
            immortals.push(Arc::new(Immortal::new(
                id,
                name,
                population.initial_health,
                population.damage,
            )?));
        }

        let ground = Arc::new(Battleground::new(
            sink,
            Duration::from_millis(config.pacing.yield_ms),
        ));
        ground.registry().extend(immortals.iter().cloned())?;

        info!(
            size = population.size,
            initial_health = population.initial_health,
            damage = population.damage,
            expected_health,
            "Population created"
        );

        Ok(Self {
            config,
            ground,
            immortals,
            expected_health,
            started: AtomicBool::new(false),
            started_at: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Create a population and start every immortal's loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new) and [`start`](Self::start).
    pub fn spawn(config: SimulationConfig, sink: Arc<dyn ReportSink>) -> Result<Self, ControllerError> {
        let population = Self::new(config, sink)?;
        population.start()?;
        Ok(population)
    }

    /// Spawn one task per immortal on the current tokio runtime.
    ///
    /// Every immortal is marked running before any task is spawned, so a
    /// quiescence wait issued right after `start` cannot return early.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NoRuntime`] outside a tokio runtime, or
    /// [`ControllerError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<(), ControllerError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ControllerError::AlreadyStarted);
        }
        *lock(&self.started_at) = Some(Utc::now());

        for immortal in &self.immortals {
            self.ground.quiescence().enlist(immortal);
        }

        let mut handles = lock(&self.handles);
        for immortal in &self.immortals {
            let rng = self.rng_for(immortal.id());
            handles.push(runtime.spawn(run_immortal(
                Arc::clone(immortal),
                Arc::clone(&self.ground),
                rng,
            )));
        }

        info!(
            immortals = self.immortals.len(),
            seeded = self.config.seed.is_some(),
            "Population started"
        );
        Ok(())
    }

    fn rng_for(&self, id: ImmortalId) -> StdRng {
        self.config.seed.map_or_else(StdRng::from_os_rng, |seed| {
            StdRng::seed_from_u64(seed.wrapping_add(id.into_inner()))
        })
    }

    // -----------------------------------------------------------------------
    // Pause / Resume / Stop
    // -----------------------------------------------------------------------

    /// Ask every immortal to suspend. Idempotent.
    pub fn pause(&self) {
        for immortal in &self.immortals {
            immortal.request_pause();
        }
        info!("Population pause requested");
    }

    /// Lift the pause and wake every suspended immortal.
    pub fn resume(&self) {
        for immortal in &self.immortals {
            immortal.request_resume();
        }
        info!("Population resumed");
    }

    /// Ask every immortal to end its loop, waking any that are paused.
    pub fn stop(&self) {
        for immortal in &self.immortals {
            immortal.request_stop();
        }
        info!("Population stop requested");
    }

    // -----------------------------------------------------------------------
    // Quiescence
    // -----------------------------------------------------------------------

    /// Wait until every immortal is paused, stopped, or dead.
    pub async fn await_quiescence(&self) {
        self.ground.quiescence().settled().await;
    }

    /// [`await_quiescence`](Self::await_quiescence) with an upper bound.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::QuiescenceTimeout`] if immortals are still
    /// running when `timeout` elapses.
    pub async fn await_quiescence_timeout(&self, timeout: Duration) -> Result<(), ControllerError> {
        if tokio::time::timeout(timeout, self.await_quiescence())
            .await
            .is_ok()
        {
            return Ok(());
        }
        Err(ControllerError::QuiescenceTimeout {
            running: self.ground.quiescence().running(),
            waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Wait until every loop has ended.
    ///
    /// Returns [`FieldOutcome::LastStanding`] when at most one immortal is
    /// left registered, or [`FieldOutcome::Halted`] when loops were stopped
    /// with several still registered. A population the operator paused does
    /// not count: the wait continues until loops actually finish.
    pub async fn await_last_standing(&self) -> FieldOutcome {
        let mut running = self.ground.quiescence().subscribe();
        loop {
            if running.wait_for(|count| *count == 0).await.is_err() {
                return self.field_outcome();
            }
            if self.ground.registry().len() <= 1 || self.all_loops_ended() {
                return self.field_outcome();
            }
            if running.changed().await.is_err() {
                return self.field_outcome();
            }
        }
    }

    fn all_loops_ended(&self) -> bool {
        self.started.load(Ordering::Acquire)
            && self.immortals.iter().all(|immortal| immortal.phase().is_terminal())
    }

    fn field_outcome(&self) -> FieldOutcome {
        let registered = self.ground.registry().len();
        if registered <= 1 {
            FieldOutcome::LastStanding
        } else {
            FieldOutcome::Halted { registered }
        }
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    /// Sum the health of every immortal ever created.
    ///
    /// Takes every immortal's lock in ascending id order, so the result is
    /// a consistent cut even while combat continues.
    pub fn snapshot_health_sum(&self) -> i64 {
        locked_health_sum(&self.immortals)
    }

    /// The conserved total, `N x H`.
    pub const fn expected_health_sum(&self) -> i64 {
        self.expected_health
    }

    /// Compare a fresh health snapshot against `N x H`.
    pub fn verify_conservation(&self) -> ConservationResult {
        let result = verify_health_sum(self.expected_health, self.snapshot_health_sum());
        if let ConservationResult::Anomaly(ref anomaly) = result {
            warn!(
                expected = anomaly.expected,
                observed = anomaly.observed,
                "Health conservation violated"
            );
        }
        result
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Wait for every immortal task to finish and return every immortal's
    /// final phase in id order.
    ///
    /// Only returns once loops have ended, so call [`stop`](Self::stop)
    /// first unless the run is expected to finish on its own. A handle is
    /// released only after its task has finished: if the wait is cancelled,
    /// as by [`join_timeout`](Self::join_timeout), unfinished tasks stay
    /// tracked and a later call waits for them again.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Join`] if any task panicked. Every other
    /// task is still joined.
    pub async fn join(&self) -> Result<Vec<Phase>, ControllerError> {
        let mut failure = None;
        loop {
            let next = lock(&self.handles).pop();
            let Some(handle) = next else {
                break;
            };
            let mut pending = PendingJoin {
                handle: Some(handle),
                home: &self.handles,
            };
            let Some(joined) = pending.wait().await else {
                break;
            };
            if let Err(source) = joined {
                warn!(error = %source, "Immortal task failed");
                if failure.is_none() {
                    failure = Some(source);
                }
            }
        }
        let phases = self.immortals.iter().map(|immortal| immortal.phase()).collect();
        failure.map_or(Ok(phases), |source| Err(ControllerError::Join { source }))
    }

    /// [`join`](Self::join) with an upper bound.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::QuiescenceTimeout`] if tasks are still
    /// running when `timeout` elapses, or any error from `join`.
    pub async fn join_timeout(&self, timeout: Duration) -> Result<Vec<Phase>, ControllerError> {
        match tokio::time::timeout(timeout, self.join()).await {
            Ok(joined) => joined,
            Err(_elapsed) => Err(ControllerError::QuiescenceTimeout {
                running: self.ground.quiescence().running(),
                waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Empty the registry. Immortal handles stay valid for inspection.
    pub fn teardown(&self) {
        self.ground.registry().clear();
        info!("Population torn down");
    }

    /// Stop, join within `timeout`, and tear down.
    ///
    /// # Errors
    ///
    /// See [`join_timeout`](Self::join_timeout). The registry is cleared
    /// either way.
    pub async fn shutdown(&self, timeout: Duration) -> Result<Vec<Phase>, ControllerError> {
        self.stop();
        let joined = self.join_timeout(timeout).await;
        self.teardown();
        joined
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Every immortal ever created, ascending by id.
    pub fn immortals(&self) -> &[ImmortalHandle] {
        &self.immortals
    }

    /// The immortal with `id`, if it belongs to this population.
    pub fn immortal(&self, id: ImmortalId) -> Option<&ImmortalHandle> {
        self.immortals
            .binary_search_by_key(&id, |immortal| immortal.id())
            .ok()
            .and_then(|index| self.immortals.get(index))
    }

    /// Immortals still in the registry, ascending by id.
    pub fn survivors(&self) -> Vec<ImmortalHandle> {
        self.ground.registry().view().iter().cloned().collect()
    }

    /// The shared battleground.
    pub const fn battleground(&self) -> &Arc<Battleground> {
        &self.ground
    }

    /// The configuration this population was built from.
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Aggregate counts, tallies, and a fresh health snapshot.
    pub fn stats(&self) -> PopulationStats {
        let count = |phase: Phase| self.immortals.iter().filter(|i| i.phase() == phase).count();
        let started_at = *lock(&self.started_at);
        let elapsed_seconds = started_at.map_or(0, |start| {
            let elapsed = Utc::now().signed_duration_since(start).num_seconds();
            u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
        });

        PopulationStats {
            population: self.immortals.len(),
            registered: self.ground.registry().len(),
            alive: self.immortals.iter().filter(|i| i.is_alive()).count(),
            pending: count(Phase::Pending),
            running: count(Phase::Running),
            paused: count(Phase::Paused),
            stopped: count(Phase::Stopped),
            dead: count(Phase::Dead),
            tally: self.ground.tally().snapshot(),
            health_sum: self.snapshot_health_sum(),
            expected_health_sum: self.expected_health,
            started_at,
            elapsed_seconds,
        }
    }
}

impl Drop for Population {
    /// Dropping a population stops its immortals.
    fn drop(&mut self) {
        for immortal in &self.immortals {
            immortal.request_stop();
        }
    }
}

/// A task handle taken out of the population while it is awaited.
///
/// Goes back to `home` on drop unless the task finished, so a cancelled
/// join never detaches a live task.
struct PendingJoin<'a> {
    handle: Option<JoinHandle<Phase>>,
    home: &'a Mutex<Vec<JoinHandle<Phase>>>,
}

impl PendingJoin<'_> {
    async fn wait(&mut self) -> Option<Result<Phase, tokio::task::JoinError>> {
        let joined = self.handle.as_mut()?.await;
        self.handle = None;
        Some(joined)
    }
}

impl Drop for PendingJoin<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            lock(self.home).push(handle);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use highlander_agents::{MemorySink, NullSink};

    use super::*;

    fn config(size: u32) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.population.size = size;
        config.pacing.yield_ms = 0;
        config.seed = Some(7);
        config
    }

    #[test]
    fn new_creates_named_pending_immortals() {
        let population = Population::new(config(3), Arc::new(NullSink)).unwrap();
        let names: Vec<&str> = population
            .immortals()
            .iter()
            .map(|i| i.display_name())
            .collect();
        assert_eq!(names, vec!["im0", "im1", "im2"]);
        assert!(population.immortals().iter().all(|i| i.phase() == Phase::Pending));
        assert_eq!(population.snapshot_health_sum(), 300);
        assert_eq!(population.survivors().len(), 3);
        assert!(population.immortal(ImmortalId::from_raw(2)).is_some());
        assert!(population.immortal(ImmortalId::from_raw(3)).is_none());
    }

    #[test]
    fn invalid_config_is_rejected_before_creation() {
        let result = Population::new(config(0), Arc::new(NullSink));
        assert!(matches!(result, Err(ControllerError::Config { .. })));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let population = Population::new(config(2), Arc::new(NullSink)).unwrap();
        assert!(matches!(population.start(), Err(ControllerError::NoRuntime { .. })));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let population = Population::spawn(config(2), Arc::new(NullSink)).unwrap();
        assert!(matches!(population.start(), Err(ControllerError::AlreadyStarted)));
        population.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pause_snapshot_conserves_health() {
        let population = Population::spawn(config(3), Arc::new(MemorySink::new())).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        population.pause();
        population
            .await_quiescence_timeout(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(population.snapshot_health_sum(), 300);
        assert!(population.verify_conservation().is_balanced());

        let stats = population.stats();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.health_sum, 300);
        assert!(stats.started_at.is_some());

        population.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_join_keeps_tracking_live_tasks() {
        let population = Population::spawn(config(3), Arc::new(NullSink)).unwrap();
        population.pause();
        population
            .await_quiescence_timeout(Duration::from_secs(5))
            .await
            .unwrap();

        let first = population.join_timeout(Duration::from_millis(20)).await;
        assert!(matches!(first, Err(ControllerError::QuiescenceTimeout { .. })));
        let second = population.join_timeout(Duration::from_millis(20)).await;
        assert!(matches!(second, Err(ControllerError::QuiescenceTimeout { .. })));
        assert!(population.immortals().iter().all(|i| i.phase() == Phase::Paused));

        population.stop();
        let phases = population.join_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(phases, vec![Phase::Stopped; 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn last_standing_wait_ends_after_stop() {
        let mut config = config(3);
        config.population.initial_health = 1_000_000;
        config.population.damage = 1;
        let population = Population::spawn(config, Arc::new(NullSink)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        population.stop();
        population.join_timeout(Duration::from_secs(5)).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), population.await_last_standing())
            .await
            .unwrap();
        assert_eq!(outcome, FieldOutcome::Halted { registered: 3 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn last_standing_wait_ends_when_paused_population_is_stopped() {
        let mut config = config(3);
        config.population.initial_health = 1_000_000;
        config.population.damage = 1;
        let population = Arc::new(Population::spawn(config, Arc::new(NullSink)).unwrap());
        population.pause();
        population
            .await_quiescence_timeout(Duration::from_secs(5))
            .await
            .unwrap();

        let waiter = {
            let population = Arc::clone(&population);
            tokio::spawn(async move { population.await_last_standing().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        population.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, FieldOutcome::Halted { registered: 3 });
    }

    #[test]
    fn stats_serialize_to_json() {
        let population = Population::new(config(2), Arc::new(NullSink)).unwrap();
        let json = serde_json::to_value(population.stats()).unwrap();
        assert_eq!(json["population"], 2);
        assert_eq!(json["pending"], 2);
        assert_eq!(json["expected_health_sum"], 200);
    }
}
