//! Shared environment every immortal loop fights in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::lifecycle::Quiescence;
use crate::registry::Registry;
use crate::report::{CombatReport, ReportSink};

/// Running totals of combat outcomes across the whole population.
#[derive(Debug, Default)]
pub struct CombatTally {
    fights: AtomicU64,
    deaths: AtomicU64,
    already_dead: AtomicU64,
    dropped_reports: AtomicU64,
}

/// Point-in-time copy of a [`CombatTally`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallySnapshot {
    /// Blows landed.
    pub fights: u64,
    /// Immortals killed.
    pub deaths: u64,
    /// Attacks that found their target already dead.
    pub already_dead: u64,
    /// Reports the sink failed to accept.
    pub dropped_reports: u64,
}

impl CombatTally {
    pub(crate) fn record_fight(&self) {
        self.fights.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_death(&self) {
        self.deaths.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_already_dead(&self) {
        self.already_dead.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped_report(&self) {
        self.dropped_reports.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current totals.
    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            fights: self.fights.load(Ordering::Relaxed),
            deaths: self.deaths.load(Ordering::Relaxed),
            already_dead: self.already_dead.load(Ordering::Relaxed),
            dropped_reports: self.dropped_reports.load(Ordering::Relaxed),
        }
    }
}

/// The registry, report sink, tallies, and pacing shared by one population.
pub struct Battleground {
    registry: Registry,
    sink: Arc<dyn ReportSink>,
    tally: CombatTally,
    quiescence: Quiescence,
    pacing: Duration,
}

impl core::fmt::Debug for Battleground {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Battleground")
            .field("registry", &self.registry)
            .field("tally", &self.tally)
            .field("quiescence", &self.quiescence)
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

impl Battleground {
    /// Create an empty battleground.
    ///
    /// `pacing` is how long each immortal rests between iterations; zero
    /// means a bare cooperative yield.
    pub fn new(sink: Arc<dyn ReportSink>, pacing: Duration) -> Self {
        Self {
            registry: Registry::new(),
            sink,
            tally: CombatTally::default(),
            quiescence: Quiescence::new(),
            pacing,
        }
    }

    /// The live population.
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Combat totals.
    pub const fn tally(&self) -> &CombatTally {
        &self.tally
    }

    /// Running-count tracker.
    pub const fn quiescence(&self) -> &Quiescence {
        &self.quiescence
    }

    /// Rest between loop iterations.
    pub const fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Deliver a report, logging and counting any sink failure.
    pub(crate) fn report(&self, report: &CombatReport) {
        if let Err(e) = self.sink.process_report(report) {
            self.tally.record_dropped_report();
            warn!(error = %e, initiator = %report.initiator(), "Combat report not delivered");
        }
    }
}
