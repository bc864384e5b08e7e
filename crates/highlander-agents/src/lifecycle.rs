//! Lifecycle phases and quiescence accounting.
//!
//! Each immortal publishes its [`Phase`]. The shared [`Quiescence`]
//! tracker counts how many immortals are actively running; the controller
//! waits for that count to reach zero before reading aggregate health.
//!
//! Only an immortal's own loop moves it between phases (plus the one-time
//! [`Quiescence::enlist`] performed by the controller before the loop is
//! spawned), so phase updates never race with each other.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::immortal::Immortal;

/// Observable lifecycle phase of an immortal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Created but its loop has not been started.
    Pending,
    /// The loop is fighting.
    Running,
    /// The loop is suspended waiting for resume or stop.
    Paused,
    /// The loop ended because stop was requested or no opponent remained.
    Stopped,
    /// The loop ended because health dropped to zero or below.
    Dead,
}

impl Phase {
    /// Whether the loop has ended.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Dead)
    }

    /// Whether the immortal counts against quiescence.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running)
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Paused => 2,
            Self::Stopped => 3,
            Self::Dead => 4,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Stopped,
            _ => Self::Dead,
        }
    }
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Counts running immortals and lets callers wait for the count to hit zero.
///
/// Backed by a [`watch`] channel so waiters are woken on every change
/// instead of polling.
#[derive(Debug)]
pub struct Quiescence {
    running: watch::Sender<usize>,
}

impl Default for Quiescence {
    fn default() -> Self {
        Self::new()
    }
}

impl Quiescence {
    /// Create a tracker with no running immortals.
    pub fn new() -> Self {
        let (running, _rx) = watch::channel(0);
        Self { running }
    }

    /// Number of immortals currently in [`Phase::Running`].
    pub fn running(&self) -> usize {
        *self.running.borrow()
    }

    /// Subscribe to changes of the running count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.running.subscribe()
    }

    /// Mark a pending immortal as running, before its loop is spawned.
    ///
    /// Returns `false` (and changes nothing) if the immortal was not
    /// [`Phase::Pending`].
    pub fn enlist(&self, immortal: &Immortal) -> bool {
        if immortal.phase() != Phase::Pending {
            return false;
        }
        self.transition(immortal, Phase::Running);
        true
    }

    /// Move an immortal to `next`, adjusting the running count.
    ///
    /// Terminal phases are sticky: once an immortal is stopped or dead,
    /// further transitions are ignored. Returns the phase the immortal was
    /// in before the call.
    pub(crate) fn transition(&self, immortal: &Immortal, next: Phase) -> Phase {
        let previous = immortal.phase();
        if previous.is_terminal() || previous == next {
            return previous;
        }
        immortal.store_phase(next);

        // Every phase change wakes subscribers, including paused to stopped,
        // which leaves the count unchanged.
        self.running
            .send_modify(|n| match (previous.is_active(), next.is_active()) {
                (true, false) => *n = n.saturating_sub(1),
                (false, true) => *n = n.saturating_add(1),
                _ => {}
            });
        previous
    }

    /// Wait until no immortal is running.
    ///
    /// Returns immediately if the count is already zero.
    pub async fn settled(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|running| *running == 0).await;
    }
}

/// Records a terminal phase if an immortal's loop exits without one.
///
/// Keeps quiescence accounting correct even if the loop unwinds.
pub(crate) struct PhaseGuard<'a> {
    immortal: &'a Immortal,
    quiescence: &'a Quiescence,
}

impl<'a> PhaseGuard<'a> {
    pub(crate) const fn new(immortal: &'a Immortal, quiescence: &'a Quiescence) -> Self {
        Self {
            immortal,
            quiescence,
        }
    }

    /// Record the phase the loop ended in.
    pub(crate) fn finish(self, phase: Phase) {
        self.quiescence.transition(self.immortal, phase);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.immortal.phase().is_terminal() {
            self.quiescence.transition(self.immortal, Phase::Stopped);
        }
    }
}
