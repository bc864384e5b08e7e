//! Random opponent selection.
//!
//! Selection works against a captured [`PopulationView`](crate::PopulationView)
//! and holds no registry lock while reading candidates, so it never nests an
//! immortal lock inside the registry lock.

use std::sync::Arc;

use rand::Rng;

use crate::immortal::Immortal;
use crate::registry::Registry;

/// What one selection attempt produced.
#[derive(Debug, Clone)]
pub enum Selection {
    /// A live opponent other than the caller.
    Opponent(Arc<Immortal>),
    /// Every sampled candidate was the caller or dead. Try again later.
    Exhausted,
    /// One or no immortals remain; there is nobody left to fight.
    Collapsed,
    /// The caller is no longer registered.
    Evicted,
}

impl Selection {
    /// Whether the caller's loop should end.
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Collapsed | Self::Evicted)
    }
}

/// Pick a uniformly random live opponent for `me`.
///
/// Samples at most as many times as the view has members. Candidate health
/// is read under the candidate's own lock with no other lock held; the
/// combat protocol re-checks it anyway.
pub fn select_opponent<R: Rng>(me: &Immortal, registry: &Registry, rng: &mut R) -> Selection {
    let view = registry.view();
    if view.len() <= 1 {
        return Selection::Collapsed;
    }
    if !view.contains(me.id()) {
        return Selection::Evicted;
    }

    for _ in 0..view.len() {
        let index = rng.random_range(0..view.len());
        let Some(candidate) = view.get(index) else {
            continue;
        };
        if candidate.id() != me.id() && candidate.is_alive() {
            return Selection::Opponent(Arc::clone(candidate));
        }
    }
    Selection::Exhausted
}
