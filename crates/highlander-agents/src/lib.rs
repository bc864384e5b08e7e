//! Immortals, the population registry, and the combat protocol for the
//! Highlander simulation.
//!
//! Every immortal runs its own autonomous loop on the tokio runtime: it
//! picks a live opponent from the shared [`Registry`], fights it through
//! the ordered-locking [`combat`] protocol, and reports what happened to a
//! [`ReportSink`]. Damage is a transfer, never creation or destruction, so
//! the sum of health across every immortal ever created is conserved.
//!
//! # Modules
//!
//! - [`battleground`] -- Shared environment handed to every immortal loop.
//! - [`combat`] -- Ordered two-party locking and the health transfer.
//! - [`error`] -- Error types ([`AgentError`], [`SinkError`]).
//! - [`ids`] -- Monotonic [`ImmortalId`] allocation.
//! - [`immortal`] -- The [`Immortal`] struct and its control flags.
//! - [`lifecycle`] -- [`Phase`] tracking and quiescence accounting.
//! - [`report`] -- [`CombatReport`] and the built-in sinks.
//! - [`registry`] -- Index-stable arena of live immortals.
//! - [`selection`] -- Random opponent selection against a registry view.
//! - [`runtime`] -- The per-immortal async loop.
//!
//! # Lock hierarchy
//!
//! ```text
//! immortal health locks (ascending ImmortalId)  ->  registry write lock  ->  sink internals
//! ```
//!
//! No code path acquires an immortal lock while holding the registry lock,
//! and no path holds a lock across an `.await`.

pub mod battleground;
pub mod combat;
pub mod error;
pub mod ids;
pub mod immortal;
pub mod lifecycle;
pub mod registry;
pub mod report;
pub mod runtime;
pub mod selection;

// Re-export primary types at crate root for convenience.
pub use battleground::{Battleground, CombatTally, TallySnapshot};
pub use combat::{FightOutcome, fight, locked_health_sum};
pub use error::{AgentError, SinkError};
pub use ids::{IdSequence, ImmortalId};
pub use immortal::Immortal;
pub use lifecycle::{Phase, Quiescence};
pub use registry::{PopulationView, Registry, SlotKey};
pub use report::{
    ChannelSink, CombatReport, Combatant, MemorySink, NullSink, ReportSink, TracingSink,
};
pub use runtime::run_immortal;
pub use selection::{Selection, select_opponent};
