//! Delta-3 phases: nine orthogonal tags, one per pair in `{0,1,2} x {0,1,2}`.
//!
//! The first coordinate follows the triad (phase 1..3), the second cycles
//! through the position within the phase modulo 3. The mapping is a pure
//! function of the global step, so it repeats every 30 steps and visits all
//! nine tags in each cycle.

use serde::Serialize;

/// One of the nine delta-3 phase tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Delta3Phase {
    /// Triad coordinate in `0..3`.
    pub primary: u8,
    /// Intra-phase coordinate in `0..3`.
    pub secondary: u8,
}

impl Delta3Phase {
    /// Tag for a global step in `1..=30`; step `0` maps to `(0, 0)`.
    pub fn for_step(global_step: u8) -> Self {
        let Some(zero_based) = global_step.checked_sub(1) else {
            return Self {
                primary: 0,
                secondary: 0,
            };
        };
        let zero_based = zero_based % 30;
        Self {
            primary: zero_based / 10,
            secondary: (zero_based % 10) % 3,
        }
    }

    /// Flat index in `0..9`.
    pub fn index(self) -> u8 {
        self.primary
            .saturating_mul(3)
            .saturating_add(self.secondary)
    }
}

impl std::fmt::Display for Delta3Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d3({},{})", self.primary, self.secondary)
    }
}
