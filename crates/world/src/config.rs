//! World configuration injected at construction time.
//!
//! Every tunable of generation, zoning and residency lives here so tests can
//! build worlds with altered tables (for example a biome table with entries
//! removed) without touching global state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tileworld_core::TilePos;
use tracing::warn;

use crate::biome::{default_biomes, BiomeDefinition};

/// Tunables for generation, zoning, residency and spawning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Tile edge length in world metres.
    pub tile_size: f64,
    /// Height samples per tile edge.
    pub resolution: usize,
    /// Global maximum height constant.
    pub max_height: f64,
    /// Global height amplifier applied on top of `max_height`.
    pub height_amplifier: f64,
    /// World metres → height-noise units.
    pub height_noise_scale: f64,
    /// Tile units → biome-noise units.
    pub biome_noise_scale: f64,
    /// Finite-difference distance used for slope probes.
    pub slope_probe: f64,
    /// Core range radius (simulated) around each player.
    pub core_radius: i32,
    /// Ring range radius (resident, rendered only) around each player.
    pub ring_radius: i32,
    /// Number of evicted, already-saved tiles kept in memory for fast re-entry.
    pub archive_capacity: usize,
    /// Starter-town anchors in tile units.
    pub towns: Vec<StarterTown>,
    /// Radius (tiles, measured between tile centres) of the safe-town override.
    pub town_radius: f64,
    /// Biome zoning thresholds.
    pub zoning: ZoningRules,
    /// Road generation rules.
    pub roads: RoadRules,
    /// Mob spawn sampling rules.
    pub spawns: SpawnRules,
    /// Diagnostic world bounds.
    pub world_bounds: WorldBounds,
    /// Biome table.
    pub biomes: Vec<BiomeDefinition>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tile_size: 100.0,
            resolution: 32,
            max_height: 40.0,
            height_amplifier: 1.5,
            height_noise_scale: 0.008,
            biome_noise_scale: 0.35,
            slope_probe: 0.5,
            core_radius: 1,
            ring_radius: 2,
            archive_capacity: 256,
            towns: default_towns(),
            town_radius: 1.5,
            zoning: ZoningRules::default(),
            roads: RoadRules::default(),
            spawns: SpawnRules::default(),
            world_bounds: WorldBounds::default(),
            biomes: default_biomes(),
        }
    }
}

impl WorldConfig {
    /// Parse a TOML document, filling omitted fields with defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: WorldConfig = toml::from_str(input).context("Failed to parse world config")?;
        Ok(config.sanitized())
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err:#}. Using defaults", path.display());
                    WorldConfig::default()
                }
            },
            Err(err) => {
                warn!("Failed to read {}: {err}. Using defaults", path.display());
                WorldConfig::default()
            }
        }
    }

    /// Vertical scale that turns fractional biome heights into metres.
    pub fn vertical_scale(&self) -> f64 {
        self.max_height * self.height_amplifier
    }

    /// Clamp values that would make generation degenerate.
    pub fn sanitized(mut self) -> Self {
        if self.resolution < 2 {
            warn!(resolution = self.resolution, "Tile resolution below 2, using 2");
            self.resolution = 2;
        }
        if self.tile_size <= 0.0 {
            warn!(tile_size = self.tile_size, "Non-positive tile size, using default");
            self.tile_size = WorldConfig::default().tile_size;
        }
        if self.slope_probe <= 0.0 {
            self.slope_probe = WorldConfig::default().slope_probe;
        }
        self.core_radius = self.core_radius.max(0);
        if self.ring_radius < self.core_radius {
            warn!(
                ring_radius = self.ring_radius,
                core_radius = self.core_radius,
                "Ring radius smaller than core radius, widening ring"
            );
            self.ring_radius = self.core_radius;
        }
        self
    }
}

/// Named starter-town anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarterTown {
    /// Display name.
    pub name: String,
    /// Anchor tile.
    pub tile: TilePos,
}

impl StarterTown {
    /// Create a named anchor at `(x, z)`.
    pub fn new(name: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            name: name.into(),
            tile: TilePos::new(x, z),
        }
    }

    /// Euclidean distance in tiles between this anchor and `pos`.
    pub fn distance_to(&self, pos: TilePos) -> f64 {
        let dx = (pos.x - self.tile.x) as f64;
        let dz = (pos.z - self.tile.z) as f64;
        (dx * dx + dz * dz).sqrt()
    }
}

fn default_towns() -> Vec<StarterTown> {
    vec![
        StarterTown::new("Haven", 0, 0),
        StarterTown::new("Eastwatch", 12, 0),
        StarterTown::new("Westmere", -12, 0),
        StarterTown::new("Southford", 0, 12),
        StarterTown::new("Northgate", 0, -12),
    ]
}

/// Threshold chain used by the biome classifier.
///
/// Evaluated top to bottom; the first matching branch wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoningRules {
    /// Biome noise below this is always water.
    pub water_cutoff: f64,
    /// Inner zone radius in tiles from the origin.
    pub inner_radius: f64,
    /// Inner zone: noise above this is lush, otherwise plains.
    pub lush_threshold: f64,
    /// Middle ring outer radius in tiles from the origin.
    pub middle_radius: f64,
    /// Middle ring: noise below this is forest.
    pub forest_below: f64,
    /// Middle ring: noise below this (and not forest) is wasteland, otherwise plains.
    pub wasteland_below: f64,
    /// Outer zone: noise below this is mountains.
    pub mountains_below: f64,
    /// Outer zone: noise below this (and not mountains) is badlands, otherwise frozen wastes.
    pub badlands_below: f64,
}

impl Default for ZoningRules {
    fn default() -> Self {
        Self {
            water_cutoff: -0.35,
            inner_radius: 10.0,
            lush_threshold: 0.2,
            middle_radius: 25.0,
            forest_below: -0.1,
            wasteland_below: 0.2,
            mountains_below: -0.1,
            badlands_below: 0.2,
        }
    }
}

/// Road placement rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadRules {
    /// Tiles closer than this to their nearest town get no road (town tiles).
    pub min_town_distance: f64,
    /// Tiles farther than this from every town get no road.
    pub max_town_distance: f64,
    /// Road width in metres.
    pub width: f64,
    /// Distance beyond the road edge over which vertex colour blends out.
    pub blend_margin: f64,
    /// Height removed directly under the road centre line.
    pub sink: f64,
}

impl Default for RoadRules {
    fn default() -> Self {
        Self {
            min_town_distance: 1.5,
            max_town_distance: 12.0,
            width: 6.0,
            blend_margin: 4.0,
            sink: 0.15,
        }
    }
}

/// Mob spawn rejection-sampling rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnRules {
    /// Minimum distance in metres between a spawn and any road.
    pub road_clearance: f64,
    /// Minimum distance in tiles between a spawn and any starter-town anchor.
    pub town_clearance: f64,
    /// Candidate draws per requested spawn.
    pub attempts_per_spawn: usize,
}

impl Default for SpawnRules {
    fn default() -> Self {
        Self {
            road_clearance: 8.0,
            town_clearance: 2.0,
            attempts_per_spawn: 12,
        }
    }
}

/// Axis-aligned diagnostic bounds in tile-grid units (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldBounds {
    /// Lowest tile column.
    pub min_x: i32,
    /// Lowest tile row.
    pub min_z: i32,
    /// Highest tile column.
    pub max_x: i32,
    /// Highest tile row.
    pub max_z: i32,
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min_x: -64,
            min_z: -64,
            max_x: 64,
            max_z: 64,
        }
    }
}

impl WorldBounds {
    /// Bounds in world metres as `(min_x, min_z, max_x, max_z)`.
    pub fn to_world(self, tile_size: f64) -> (f64, f64, f64, f64) {
        (
            self.min_x as f64 * tile_size,
            self.min_z as f64 * tile_size,
            (self.max_x + 1) as f64 * tile_size,
            (self.max_z + 1) as f64 * tile_size,
        )
    }

    /// Whether `pos` lies inside the bounds.
    pub fn contains(self, pos: TilePos) -> bool {
        (self.min_x..=self.max_x).contains(&pos.x) && (self.min_z..=self.max_z).contains(&pos.z)
    }
}
