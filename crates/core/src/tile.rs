//! Tile grid coordinates and player identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::WorldError;

/// Integer grid coordinate of a tile.
///
/// Implements Ord for deterministic iteration in BTreeMap/BTreeSet (sorts by x, then z).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct TilePos {
    /// Grid column.
    pub x: i32,
    /// Grid row.
    pub z: i32,
}

impl TilePos {
    /// Tile at grid coordinate `(x, z)`.
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Tile containing the world-space point `(world_x, world_z)`.
    pub fn from_world(world_x: f64, world_z: f64, tile_size: f64) -> Self {
        Self {
            x: (world_x / tile_size).floor() as i32,
            z: (world_z / tile_size).floor() as i32,
        }
    }

    /// Stable string key (`"{x}_{z}"`) used in logs and persisted ids.
    pub fn key(self) -> String {
        format!("{}_{}", self.x, self.z)
    }

    /// World-space position of the tile's minimum corner.
    pub fn origin(self, tile_size: f64) -> (f64, f64) {
        (self.x as f64 * tile_size, self.z as f64 * tile_size)
    }

    /// World-space position of the tile's centre.
    pub fn center(self, tile_size: f64) -> (f64, f64) {
        (
            (self.x as f64 + 0.5) * tile_size,
            (self.z as f64 + 0.5) * tile_size,
        )
    }

    /// Chebyshev (square-ring) distance in tiles.
    pub fn ring_distance(self, other: TilePos) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    /// Every tile within `radius` of `self` on both axes, row-major.
    pub fn square(self, radius: i32) -> impl Iterator<Item = TilePos> {
        let radius = radius.max(0);
        (-radius..=radius).flat_map(move |dz| {
            (-radius..=radius).map(move |dx| TilePos::new(self.x + dx, self.z + dz))
        })
    }

    /// Opaque per-tile seed derived from the coordinates alone.
    ///
    /// Position-keyed rather than world-seed-keyed: two tiles with the same
    /// coordinates always share a seed within one build.
    pub fn seed(self) -> u64 {
        let packed = ((self.x as u32 as u64) << 32) | (self.z as u32 as u64);
        splitmix64(packed)
    }
}

fn splitmix64(mut v: u64) -> u64 {
    v = v.wrapping_add(0x9E37_79B9_7F4A_7C15);
    v = (v ^ (v >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    v = (v ^ (v >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    v ^ (v >> 31)
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.x, self.z)
    }
}

impl FromStr for TilePos {
    type Err = WorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The x component may itself be negative, so split on the last '_'.
        let (x, z) = s
            .rsplit_once('_')
            .ok_or_else(|| WorldError::MalformedKey(s.to_string()))?;
        let x = x
            .parse()
            .map_err(|_| WorldError::MalformedKey(s.to_string()))?;
        let z = z
            .parse()
            .map_err(|_| WorldError::MalformedKey(s.to_string()))?;
        Ok(Self { x, z })
    }
}

/// Identifier of a connected player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

/// One entry of the player position feed, in world metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerPosition {
    /// Player the sample belongs to.
    pub id: PlayerId,
    /// World x.
    pub x: f64,
    /// World z.
    pub z: f64,
}

impl PlayerPosition {
    /// Position sample for `id` at `(x, z)`.
    pub const fn new(id: PlayerId, x: f64, z: f64) -> Self {
        Self { id, x, z }
    }
}
