//! Combat reports and the sinks that receive them.
//!
//! The combat protocol emits a [`CombatReport`] for every fight, death, and
//! already-dead encounter. Reports are typed; their [`Display`] impl is the
//! human-readable line a text log or GUI would append.
//!
//! Sinks are called while the combat protocol still holds both immortals'
//! locks, which keeps the report stream in the same order as the health
//! mutations. A sink must therefore return quickly and must never call back
//! into an immortal.
//!
//! [`Display`]: core::fmt::Display

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::SinkError;
use crate::ids::ImmortalId;

/// Identity and health of one participant at the moment of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    /// The participant's id.
    pub id: ImmortalId,
    /// The participant's display name.
    pub name: String,
    /// Health right after the reported event.
    pub health: i64,
}

impl core::fmt::Display for Combatant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}[{}]", self.name, self.health)
    }
}

/// One resolved combat event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatReport {
    /// The attacker landed a blow and took `damage` health from the defender.
    Fight {
        /// The attacking immortal, after gaining health.
        attacker: Combatant,
        /// The defending immortal, after losing health.
        defender: Combatant,
        /// Health transferred.
        damage: i64,
    },
    /// The defender's health reached zero or below and it left the registry.
    Death {
        /// The immortal that died.
        fallen: Combatant,
        /// The immortal that landed the final blow.
        slain_by: Combatant,
    },
    /// The chosen opponent was already dead once both locks were held.
    AlreadyDead {
        /// The would-be attacker.
        attacker: Combatant,
        /// The dead target.
        target: Combatant,
    },
}

impl CombatReport {
    /// Id of the immortal that initiated the encounter.
    pub fn initiator(&self) -> ImmortalId {
        match self {
            Self::Fight { attacker, .. } | Self::AlreadyDead { attacker, .. } => attacker.id,
            Self::Death { slain_by, .. } => slain_by.id,
        }
    }
}

impl core::fmt::Display for CombatReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Fight {
                attacker, defender, ..
            } => write!(f, "Fight: {attacker} vs {defender}"),
            Self::Death { fallen, slain_by } => write!(
                f,
                "{fallen} has died at the hands of {slain_by} and been removed from the simulation"
            ),
            Self::AlreadyDead { attacker, target } => {
                write!(f, "{attacker} says: {target} is already dead")
            }
        }
    }
}

/// Receiver of combat reports.
///
/// Implementations must be fast and non-blocking. Errors are logged by the
/// caller and otherwise ignored.
pub trait ReportSink: Send + Sync {
    /// Accept one report.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the report could not be delivered.
    fn process_report(&self, report: &CombatReport) -> Result<(), SinkError>;
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn process_report(&self, _report: &CombatReport) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes each report line through `tracing` at `info` level.
///
/// The write happens synchronously while both combatants are locked, so a
/// subscriber that blocks (a full pipe, a slow terminal) stalls that fight.
/// Use [`ChannelSink`] when the consumer may be slow.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn process_report(&self, report: &CombatReport) -> Result<(), SinkError> {
        info!(target: "highlander::combat", initiator = %report.initiator(), "{report}");
        Ok(())
    }
}

/// Collects reports in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<CombatReport>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CombatReport>> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of every report received so far.
    pub fn reports(&self) -> Vec<CombatReport> {
        self.lock().clone()
    }

    /// Rendered lines of every report received so far.
    pub fn lines(&self) -> Vec<String> {
        self.lock().iter().map(ToString::to_string).collect()
    }

    /// Number of reports received.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no report has been received.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl ReportSink for MemorySink {
    fn process_report(&self, report: &CombatReport) -> Result<(), SinkError> {
        self.lock().push(report.clone());
        Ok(())
    }
}

/// Forwards reports over a bounded tokio channel without ever waiting.
///
/// When the buffer is full the report is dropped and [`SinkError::Full`]
/// is returned, so a slow consumer can never stall combat.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CombatReport>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CombatReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ReportSink for ChannelSink {
    fn process_report(&self, report: &CombatReport) -> Result<(), SinkError> {
        self.tx.try_send(report.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combatant(raw: u64, health: i64) -> Combatant {
        Combatant {
            id: ImmortalId::from_raw(raw),
            name: format!("im{raw}"),
            health,
        }
    }

    fn fight() -> CombatReport {
        CombatReport::Fight {
            attacker: combatant(0, 110),
            defender: combatant(1, 90),
            damage: 10,
        }
    }

    #[test]
    fn report_lines_are_human_readable() {
        assert_eq!(fight().to_string(), "Fight: im0[110] vs im1[90]");

        let death = CombatReport::Death {
            fallen: combatant(1, 0),
            slain_by: combatant(0, 200),
        };
        assert!(death.to_string().starts_with("im1[0] has died"));

        let dead = CombatReport::AlreadyDead {
            attacker: combatant(2, 50),
            target: combatant(1, -10),
        };
        assert_eq!(dead.to_string(), "im2[50] says: im1[-10] is already dead");
        assert_eq!(dead.initiator(), ImmortalId::from_raw(2));
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        let first = fight();
        let second = CombatReport::AlreadyDead {
            attacker: combatant(0, 110),
            target: combatant(3, 0),
        };
        assert!(sink.process_report(&first).is_ok());
        assert!(sink.process_report(&second).is_ok());
        assert_eq!(sink.reports(), vec![first, second]);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        assert_eq!(sink.process_report(&fight()), Ok(()));
        assert_eq!(sink.process_report(&fight()), Err(SinkError::Full));
        assert!(rx.try_recv().is_ok());
        assert_eq!(sink.process_report(&fight()), Ok(()));
    }

    #[test]
    fn channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        assert_eq!(sink.process_report(&fight()), Err(SinkError::Closed));
    }

    #[test]
    fn reports_serialize_to_json() {
        let json = serde_json::to_string(&fight()).ok();
        assert!(json.as_deref().is_some_and(|j| j.contains("\"Fight\"")));
    }
}
