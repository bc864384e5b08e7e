//! The immortal: identity, health, and pause/stop control.
//!
//! An [`Immortal`] is plain shared data. Its behavior lives in
//! [`run_immortal`](crate::runtime::run_immortal), a free-standing async
//! loop spawned once per immortal.
//!
//! # Locking
//!
//! `health` sits behind the immortal's own [`Mutex`]; that mutex is the
//! exclusive lock the combat protocol acquires. Control flags are atomics
//! so the controller can flip them without contending with combat.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::AgentError;
use crate::ids::ImmortalId;
use crate::lifecycle::Phase;

/// One concurrently scheduled combatant.
#[derive(Debug)]
pub struct Immortal {
    /// Stable identity and lock-ordering key.
    id: ImmortalId,
    /// Display name used in reports.
    name: String,
    /// Health dealt per successful attack.
    damage: i64,
    /// Current health. This mutex is the immortal's exclusive lock.
    health: Mutex<i64>,
    /// Successful attacks launched by this immortal.
    strikes: AtomicU64,
    /// Set by the controller to suspend the loop.
    pause_requested: AtomicBool,
    /// Set by the controller to end the loop.
    stop_requested: AtomicBool,
    /// Wakes the loop when pause is lifted or stop is requested.
    wake: Notify,
    /// Current [`Phase`], encoded as `u8`.
    phase: AtomicU8,
}

impl Immortal {
    /// Create an immortal with full health in [`Phase::Pending`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidParameter`] if `health` or `damage` is
    /// not strictly positive.
    pub fn new(
        id: ImmortalId,
        name: impl Into<String>,
        health: i64,
        damage: i64,
    ) -> Result<Self, AgentError> {
        if health <= 0 {
            return Err(AgentError::InvalidParameter {
                reason: format!("initial health must be positive, got {health}"),
            });
        }
        if damage <= 0 {
            return Err(AgentError::InvalidParameter {
                reason: format!("damage must be positive, got {damage}"),
            });
        }

        Ok(Self {
            id,
            name: name.into(),
            damage,
            health: Mutex::new(health),
            strikes: AtomicU64::new(0),
            pause_requested: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            phase: AtomicU8::new(Phase::Pending.to_u8()),
        })
    }

    /// Return the immortal's id.
    pub const fn id(&self) -> ImmortalId {
        self.id
    }

    /// Return the display name.
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Return the damage dealt per successful attack.
    pub const fn damage(&self) -> i64 {
        self.damage
    }

    /// Read the current health under the immortal's lock.
    ///
    /// Must not be called while the caller already holds this immortal's
    /// lock (for example from inside the combat protocol).
    pub fn current_health(&self) -> i64 {
        *self.lock_health()
    }

    /// Whether health is strictly positive.
    pub fn is_alive(&self) -> bool {
        self.current_health() > 0
    }

    /// Number of attacks this immortal has landed.
    pub fn strikes(&self) -> u64 {
        self.strikes.load(Ordering::Relaxed)
    }

    /// Acquire the immortal's exclusive lock.
    ///
    /// A poisoned lock is recovered: the guarded value is a single integer
    /// that is always written in one step.
    pub(crate) fn lock_health(&self) -> MutexGuard<'_, i64> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_strike(&self) {
        self.strikes.fetch_add(1, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Phase
    // -----------------------------------------------------------------------

    /// Return the current lifecycle phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn store_phase(&self, phase: Phase) {
        self.phase.store(phase.to_u8(), Ordering::Release);
    }

    /// Whether the loop is currently suspended.
    pub fn is_paused(&self) -> bool {
        self.phase() == Phase::Paused
    }

    /// Whether the loop has ended, by stop or by death.
    pub fn is_stopped(&self) -> bool {
        self.phase().is_terminal()
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Ask the loop to suspend before its next combat attempt. Idempotent.
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::Release);
    }

    /// Lift a pause request and wake the loop.
    pub fn request_resume(&self) {
        self.pause_requested.store(false, Ordering::Release);
        self.wake.notify_one();
    }

    /// Ask the loop to end, waking it if it is suspended.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Whether a pause is currently requested.
    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::Acquire)
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Wait while a pause is requested and no stop is.
    ///
    /// Returns immediately if not paused. The wake-up uses a stored
    /// [`Notify`] permit, so a resume that lands between the flag check and
    /// the wait is not lost.
    pub(crate) async fn wait_while_paused(&self) {
        while self.is_pause_requested() && !self.is_stop_requested() {
            self.wake.notified().await;
        }
    }
}

impl core::fmt::Display for Immortal {
    /// Formats as `name[health]`. Takes the immortal's lock.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}[{}]", self.name, self.current_health())
    }
}

impl PartialEq for Immortal {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Immortal {}
