#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod error;
pub mod tile;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

pub use error::WorldError;
pub use tile::{PlayerId, PlayerPosition, TilePos};

/// Lifecycle pass counter. Passes run on wall-clock cadence, so a tick here
/// is one coarse recompute rather than one render frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimTick(pub u64);

impl SimTick {
    /// First tick in any deterministic timeline.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }
}

/// Reproducible RNG for one tile-scoped generation domain.
///
/// `salt` separates independent streams drawn from the same tile (resource
/// placement, spawn sampling) so they never share a sequence.
pub fn tile_rng(tile_seed: u64, salt: u64) -> StdRng {
    StdRng::seed_from_u64(tile_seed ^ salt.rotate_left(17))
}
