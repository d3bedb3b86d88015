//! Dempster-Shafer basic belief assignment over {Occupied, Free, Unknown}.
//!
//! Focal elements are the singletons {O}, {F} and the frame Θ (unknown).
//! Combination follows the Dempster rule with 1/(1-K) renormalization; a
//! conflict K at or beyond 1-ε collapses to the vacuous mass and flags total
//! conflict instead of dividing by ~0.

use serde::{Deserialize, Serialize};

/// Tolerance for mass-sum and conflict comparisons.
pub const MASS_EPSILON: f64 = 1e-9;

/// Mass function over {occupied, free, unknown}; components in [0,1] summing
/// to 1 within ε.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DsMass {
    pub occupied: f64,
    pub free: f64,
    pub unknown: f64,
}

/// Result of a Dempster combination.
#[derive(Clone, Copy, Debug)]
pub struct CombineOutcome {
    pub mass: DsMass,
    /// Conflict K in [0,1).
    pub conflict: f64,
    /// Set when K >= 1-ε forced the vacuous fallback.
    pub total_conflict: bool,
}

impl DsMass {
    /// The vacuous mass: all belief on the frame.
    pub fn vacuous() -> Self {
        Self {
            occupied: 0.0,
            free: 0.0,
            unknown: 1.0,
        }
    }

    /// Construct a mass, renormalizing when the invariant does not hold.
    ///
    /// Non-finite or negative components and a non-positive sum collapse to
    /// the vacuous mass; an off-by-more-than-ε sum renormalizes.
    pub fn new(occupied: f64, free: f64, unknown: f64) -> Self {
        let candidate = Self {
            occupied,
            free,
            unknown,
        };
        if candidate.is_valid() {
            return candidate;
        }
        let components = [occupied, free, unknown];
        if components.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Self::vacuous();
        }
        let sum: f64 = components.iter().sum();
        if sum <= MASS_EPSILON {
            return Self::vacuous();
        }
        Self {
            occupied: occupied / sum,
            free: free / sum,
            unknown: unknown / sum,
        }
    }

    /// Invariant check: components in [0,1], sum within ε of 1.
    pub fn is_valid(&self) -> bool {
        let components = [self.occupied, self.free, self.unknown];
        components
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
            && (self.sum() - 1.0).abs() <= MASS_EPSILON
    }

    pub fn sum(&self) -> f64 {
        self.occupied + self.free + self.unknown
    }

    /// Dempster combination with conflict reporting.
    pub fn combine(&self, other: &DsMass) -> CombineOutcome {
        let conflict = self.occupied * other.free + self.free * other.occupied;
        if conflict >= 1.0 - MASS_EPSILON {
            return CombineOutcome {
                mass: Self::vacuous(),
                conflict: conflict.min(1.0 - MASS_EPSILON),
                total_conflict: true,
            };
        }
        let norm = 1.0 / (1.0 - conflict);
        let occupied = (self.occupied * other.occupied
            + self.occupied * other.unknown
            + self.unknown * other.occupied)
            * norm;
        let free = (self.free * other.free
            + self.free * other.unknown
            + self.unknown * other.free)
            * norm;
        let unknown = (self.unknown * other.unknown) * norm;
        CombineOutcome {
            mass: Self::new(occupied, free, unknown),
            conflict,
            total_conflict: false,
        }
    }

    /// Reliability discounting: shift (1-r) of the singleton belief onto the
    /// frame. r=1 is the identity; r=0 is vacuous.
    pub fn discount(&self, reliability: f64) -> Self {
        let r = reliability.clamp(0.0, 1.0);
        Self::new(
            self.occupied * r,
            self.free * r,
            1.0 - r * (self.occupied + self.free),
        )
    }
}
