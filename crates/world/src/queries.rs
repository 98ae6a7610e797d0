//! Gameplay terrain queries: walkability, terrain info and mob spawn sampling.
//!
//! Every query goes through the same [`HeightSampler`] the tile generator uses,
//! so a point that looks walkable in generated geometry answers walkable here.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tileworld_core::{tile_rng, TilePos};

use crate::biome::BiomeId;
use crate::heightmap::HeightSampler;
use crate::roads::{distance_to_roads, plan_road};

const SPAWN_SALT: u64 = 0x5350_4157_4E53;

/// Why a point is or is not walkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkReason {
    Walkable,
    Underwater,
    TooSteep,
    WaterBiome,
}

/// Result of a walkability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Walkability {
    pub walkable: bool,
    pub reason: WalkReason,
}

impl Walkability {
    fn blocked(reason: WalkReason) -> Self {
        Self {
            walkable: false,
            reason,
        }
    }
}

/// Everything gameplay needs to know about a terrain point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainInfo {
    pub height: f64,
    pub biome: BiomeId,
    pub walkable: bool,
    pub slope: f64,
    pub underwater: bool,
}

/// Candidate mob spawn location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    /// World-space `[x, y, z]`.
    pub position: [f64; 3],
    pub eligible_mob_types: Vec<String>,
    pub biome: BiomeId,
    pub difficulty: u8,
}

/// Query facade over a shared height sampler.
#[derive(Debug, Clone)]
pub struct TerrainQueries {
    sampler: Arc<HeightSampler>,
    probe: f64,
}

impl TerrainQueries {
    /// Queries using the configured slope probe distance.
    pub fn new(sampler: Arc<HeightSampler>) -> Self {
        let probe = sampler.config().slope_probe;
        Self { sampler, probe }
    }

    /// Same sampler, different slope probe distance.
    pub fn with_probe(&self, probe: f64) -> Self {
        Self {
            sampler: Arc::clone(&self.sampler),
            probe,
        }
    }

    /// Probe distance used for slope estimation.
    pub fn probe(&self) -> f64 {
        self.probe
    }

    pub fn sampler(&self) -> &Arc<HeightSampler> {
        &self.sampler
    }

    /// Terrain height in metres.
    pub fn height_at(&self, x: f64, z: f64) -> f64 {
        self.sampler.height_at(x, z)
    }

    /// Walkability of `(x, z)`.
    ///
    /// Rules are checked in order: underwater, too steep, water biome.
    pub fn is_walkable(&self, x: f64, z: f64) -> Walkability {
        let biome = self.sampler.biome_at(x, z);
        let height = self.sampler.height_with(biome, x, z);
        if height < self.sampler.water_height(biome) {
            return Walkability::blocked(WalkReason::Underwater);
        }
        if self.sampler.slope_at(x, z, self.probe) > biome.max_slope {
            return Walkability::blocked(WalkReason::TooSteep);
        }
        if biome.is_water {
            return Walkability::blocked(WalkReason::WaterBiome);
        }
        Walkability {
            walkable: true,
            reason: WalkReason::Walkable,
        }
    }

    /// Height, biome, slope and walkability of `(x, z)` in one call.
    pub fn terrain_info_at(&self, x: f64, z: f64) -> TerrainInfo {
        let biome = self.sampler.biome_at(x, z);
        let height = self.sampler.height_with(biome, x, z);
        TerrainInfo {
            height,
            biome: biome.id,
            walkable: self.is_walkable(x, z).walkable,
            slope: self.sampler.slope_at(x, z, self.probe),
            underwater: height < self.sampler.water_height(biome),
        }
    }

    /// Deterministically rejection-sample up to `max` spawn points in a tile.
    ///
    /// Accepted points are walkable, keep the configured clearance from the
    /// tile's road and from every starter-town anchor. Tiles whose biome lists
    /// no mobs yield nothing.
    pub fn mob_spawn_positions(&self, tile_x: i32, tile_z: i32, max: usize) -> Vec<SpawnPoint> {
        let config = self.sampler.config();
        let pos = TilePos::new(tile_x, tile_z);
        let biome = self.sampler.classifier().definition(pos);
        if max == 0 || biome.mobs.is_empty() {
            return Vec::new();
        }

        let roads: Vec<_> =
            plan_road(self.sampler.classifier(), &config.roads, config.tile_size, pos)
                .into_iter()
                .collect();
        let (ox, oz) = pos.origin(config.tile_size);
        let rules = &config.spawns;
        let mut rng = tile_rng(pos.seed(), SPAWN_SALT);
        let mut spawns = Vec::with_capacity(max);

        for _ in 0..max.saturating_mul(rules.attempts_per_spawn) {
            if spawns.len() >= max {
                break;
            }
            let lx = rng.gen_range(0.0..config.tile_size);
            let lz = rng.gen_range(0.0..config.tile_size);
            if distance_to_roads(&roads, lx, lz) < rules.road_clearance {
                continue;
            }
            let (wx, wz) = (ox + lx, oz + lz);
            if self.town_distance(wx, wz) < rules.town_clearance {
                continue;
            }
            if !self.is_walkable(wx, wz).walkable {
                continue;
            }
            spawns.push(SpawnPoint {
                position: [wx, self.sampler.height_with(biome, wx, wz), wz],
                eligible_mob_types: biome.mobs.clone(),
                biome: biome.id,
                difficulty: biome.difficulty,
            });
        }
        spawns
    }

    /// Distance in tiles from a world point to the nearest town anchor centre.
    fn town_distance(&self, x: f64, z: f64) -> f64 {
        let tile_size = self.sampler.config().tile_size;
        self.sampler
            .classifier()
            .towns()
            .iter()
            .map(|town| {
                let (cx, cz) = town.tile.center(tile_size);
                ((x - cx).powi(2) + (z - cz).powi(2)).sqrt() / tile_size
            })
            .fold(f64::INFINITY, f64::min)
    }
}
