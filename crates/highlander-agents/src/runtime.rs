//! The per-immortal async loop.
//!
//! Each immortal runs [`run_immortal`] as its own tokio task. The loop
//! checks its control flags at the top of every iteration, fights at most
//! once per iteration, and then yields so the other immortals get a turn.

use std::sync::Arc;

use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::battleground::Battleground;
use crate::combat::{FightOutcome, fight};
use crate::immortal::Immortal;
use crate::lifecycle::{Phase, PhaseGuard};
use crate::selection::{Selection, select_opponent};

/// Drive one immortal until it is stopped, dies, or runs out of opponents.
///
/// The immortal must already be enlisted with the battleground's
/// [`Quiescence`](crate::Quiescence) tracker. Returns the terminal phase
/// the loop ended in.
pub async fn run_immortal(immortal: Arc<Immortal>, ground: Arc<Battleground>, mut rng: StdRng) -> Phase {
    let guard = PhaseGuard::new(&immortal, ground.quiescence());
    info!(immortal = %immortal.id(), name = immortal.display_name(), "Immortal entering the fray");

    let end = loop {
        if immortal.is_stop_requested() {
            break Phase::Stopped;
        }

        if immortal.is_pause_requested() {
            ground.quiescence().transition(&immortal, Phase::Paused);
            debug!(immortal = %immortal.id(), "Paused");
            immortal.wait_while_paused().await;
            if immortal.is_stop_requested() {
                break Phase::Stopped;
            }
            ground.quiescence().transition(&immortal, Phase::Running);
            debug!(immortal = %immortal.id(), "Resumed");
            continue;
        }

        if !immortal.is_alive() {
            break Phase::Dead;
        }

        match select_opponent(&immortal, ground.registry(), &mut rng) {
            Selection::Opponent(opponent) => {
                if fight(&immortal, &opponent, &ground) == FightOutcome::AttackerFallen {
                    break Phase::Dead;
                }
            }
            Selection::Exhausted => {}
            Selection::Collapsed | Selection::Evicted => {
                break if immortal.is_alive() {
                    Phase::Stopped
                } else {
                    Phase::Dead
                };
            }
        }

        pace(&ground).await;
    };

    guard.finish(end);
    info!(
        immortal = %immortal.id(),
        phase = %end,
        health = immortal.current_health(),
        strikes = immortal.strikes(),
        "Immortal left the fray"
    );
    end
}

async fn pace(ground: &Battleground) {
    let pacing = ground.pacing();
    if pacing.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(pacing).await;
    }
}
