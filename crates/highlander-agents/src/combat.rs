//! The combat protocol: ordered two-party locking and the health transfer.
//!
//! Both immortals' locks are taken in ascending [`ImmortalId`] order, so an
//! attack A→B and a concurrent attack B→A always contend on the same first
//! lock and can never deadlock. Health moves from defender to attacker in a
//! single critical section; no health is created or destroyed.
//!
//! Reports are emitted while both locks are still held. A defender that
//! dies is removed from the registry inside the same critical section, which
//! is the only place registry removal happens during a run.

use std::sync::{Arc, MutexGuard};

use tracing::{debug, warn};

use crate::battleground::Battleground;
use crate::ids::ImmortalId;
use crate::immortal::Immortal;
use crate::report::{CombatReport, Combatant};

/// Result of one call to [`fight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FightOutcome {
    /// Damage was transferred.
    Struck {
        /// Attacker health after the blow.
        attacker_health: i64,
        /// Defender health after the blow.
        defender_health: i64,
        /// Whether the blow killed the defender.
        killed: bool,
    },
    /// The defender was already dead once both locks were held.
    AlreadyDead,
    /// The attacker itself was dead once both locks were held.
    AttackerFallen,
    /// Attacker and defender are the same immortal.
    SelfTarget,
    /// The transfer would overflow `i64`; nothing was changed.
    Overflow,
}

/// Lock two distinct immortals in ascending id order.
///
/// Guards are returned in argument order, regardless of which lock was
/// taken first. Returns `None` if both references name the same immortal.
pub(crate) fn lock_pair<'a>(
    a: &'a Immortal,
    b: &'a Immortal,
) -> Option<(MutexGuard<'a, i64>, MutexGuard<'a, i64>)> {
    match a.id().cmp(&b.id()) {
        core::cmp::Ordering::Less => {
            let first = a.lock_health();
            let second = b.lock_health();
            Some((first, second))
        }
        core::cmp::Ordering::Greater => {
            let first = b.lock_health();
            let second = a.lock_health();
            Some((second, first))
        }
        core::cmp::Ordering::Equal => None,
    }
}

fn combatant(immortal: &Immortal, health: i64) -> Combatant {
    Combatant {
        id: immortal.id(),
        name: immortal.display_name().to_owned(),
        health,
    }
}

/// Resolve one attack of `attacker` against `defender`.
///
/// The defender's health is re-checked under both locks, so a target killed
/// between selection and locking yields [`FightOutcome::AlreadyDead`]
/// instead of a second death. A dead attacker never strikes.
pub fn fight(attacker: &Immortal, defender: &Immortal, ground: &Battleground) -> FightOutcome {
    let Some((mut attacker_hp, mut defender_hp)) = lock_pair(attacker, defender) else {
        return FightOutcome::SelfTarget;
    };

    if *attacker_hp <= 0 {
        return FightOutcome::AttackerFallen;
    }

    if *defender_hp <= 0 {
        ground.tally().record_already_dead();
        ground.report(&CombatReport::AlreadyDead {
            attacker: combatant(attacker, *attacker_hp),
            target: combatant(defender, *defender_hp),
        });
        return FightOutcome::AlreadyDead;
    }

    let damage = attacker.damage();
    let (Some(defender_after), Some(attacker_after)) = (
        defender_hp.checked_sub(damage),
        attacker_hp.checked_add(damage),
    ) else {
        warn!(
            attacker = %attacker.id(),
            defender = %defender.id(),
            damage,
            "Health transfer would overflow, blow skipped"
        );
        return FightOutcome::Overflow;
    };

    *defender_hp = defender_after;
    *attacker_hp = attacker_after;
    attacker.record_strike();
    ground.tally().record_fight();

    let attacker_view = combatant(attacker, attacker_after);
    let defender_view = combatant(defender, defender_after);
    debug!(
        attacker = %attacker.id(),
        defender = %defender.id(),
        attacker_health = attacker_after,
        defender_health = defender_after,
        "Blow landed"
    );
    ground.report(&CombatReport::Fight {
        attacker: attacker_view.clone(),
        defender: defender_view.clone(),
        damage,
    });

    let killed = defender_after <= 0;
    if killed {
        evict(defender.id(), ground);
        ground.report(&CombatReport::Death {
            fallen: defender_view,
            slain_by: attacker_view,
        });
    }

    FightOutcome::Struck {
        attacker_health: attacker_after,
        defender_health: defender_after,
        killed,
    }
}

/// Sum the health of `members` while holding every one of their locks.
///
/// Locks are taken in ascending id order, the same order [`fight`] uses,
/// so the census can run alongside combat without deadlocking and sees no
/// transfer half-applied. Duplicate entries are locked once.
pub fn locked_health_sum(members: &[Arc<Immortal>]) -> i64 {
    let mut ordered: Vec<&Immortal> = members.iter().map(AsRef::as_ref).collect();
    ordered.sort_by_key(|member| member.id());
    ordered.dedup_by_key(|member| member.id());

    let guards: Vec<MutexGuard<'_, i64>> = ordered.iter().map(|member| member.lock_health()).collect();
    guards.iter().fold(0_i64, |sum, health| sum.saturating_add(**health))
}

/// Remove a freshly killed immortal. Called with both combat locks held.
fn evict(id: ImmortalId, ground: &Battleground) {
    if ground.registry().remove(id) {
        ground.tally().record_death();
    } else {
        warn!(immortal = %id, "Killed immortal was not registered");
    }
}
