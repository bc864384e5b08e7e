//! Health conservation verification.
//!
//! Combat only ever moves health from one immortal to another, so for a
//! population of `N` immortals created with `H` health each:
//!
//! ```text
//! sum(health of every immortal ever created) == N x H
//! ```
//!
//! Dead immortals keep their last (zero or negative) value and still count.
//! The check holds by construction; it exists to catch locking bugs, which
//! would show up as lost or duplicated transfers.

use serde::{Deserialize, Serialize};

use crate::config::PopulationConfig;

/// A conservation violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthAnomaly {
    /// `N x H` for the population.
    pub expected: i64,
    /// The sum actually observed.
    pub observed: i64,
    /// Human-readable description of the imbalance.
    pub message: String,
}

/// The result of one conservation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConservationResult {
    /// Health is balanced.
    Balanced,
    /// Health was created or destroyed.
    Anomaly(HealthAnomaly),
}

impl ConservationResult {
    /// Whether the check passed.
    pub const fn is_balanced(&self) -> bool {
        matches!(self, Self::Balanced)
    }
}

/// The conserved sum for `population`, or `None` if it overflows `i64`.
pub fn expected_health_sum(population: &PopulationConfig) -> Option<i64> {
    population.total_health()
}

/// Compare an observed health sum against the expected total.
pub fn verify_health_sum(expected: i64, observed: i64) -> ConservationResult {
    if expected == observed {
        return ConservationResult::Balanced;
    }
    let drift = observed.saturating_sub(expected);
    ConservationResult::Anomaly(HealthAnomaly {
        expected,
        observed,
        message: format!(
            "health sum drifted by {drift:+}: expected {expected}, observed {observed}"
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_sums_balance() {
        assert!(verify_health_sum(300, 300).is_balanced());
    }

    #[test]
    fn drift_is_reported_with_sign() {
        let result = verify_health_sum(300, 290);
        assert_eq!(
            result,
            ConservationResult::Anomaly(HealthAnomaly {
                expected: 300,
                observed: 290,
                message: "health sum drifted by -10: expected 300, observed 290".to_owned(),
            })
        );

        let result = verify_health_sum(300, 310);
        assert!(matches!(
            result,
            ConservationResult::Anomaly(HealthAnomaly { ref message, .. }) if message.contains("+10")
        ));
    }

    #[test]
    fn expected_sum_follows_population() {
        let population = PopulationConfig::default();
        assert_eq!(expected_health_sum(&population), Some(300));

        let huge = PopulationConfig {
            size: u32::MAX,
            initial_health: i64::MAX,
            ..PopulationConfig::default()
        };
        assert_eq!(expected_health_sum(&huge), None);
    }
}
