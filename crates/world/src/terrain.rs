//! Tile generation: heights, road, blend weights and resource nodes.

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tileworld_core::{tile_rng, TilePos, WorldError};
use tracing::{debug, instrument, warn};

use crate::biome::{BiomeDefinition, BiomeId};
use crate::heightmap::{HeightSampler, Heightmap};
use crate::persist::TileRecord;
use crate::queries::TerrainQueries;
use crate::roads::{on_road, plan_road, road_weight};
use crate::tile::{vertex_offset, ResourceKind, ResourceNode, RoadSegment, Tile};

/// Candidate draws per requested resource node.
const ATTEMPTS_PER_RESOURCE: usize = 4;

/// Chance that a tile carries a gem.
const GEM_CHANCE: f64 = 0.15;

/// Failure reported by the collision collaborator.
#[derive(Debug, Error)]
pub enum CollisionError {
    /// The backend refused the geometry.
    #[error("collision geometry rejected: {0}")]
    Rejected(String),
    /// The backend is not accepting work.
    #[error("collision backend unavailable")]
    Unavailable,
}

impl CollisionError {
    /// Attach the tile this failure belongs to.
    pub fn for_tile(self, tile: TilePos) -> WorldError {
        WorldError::Collision {
            tile,
            reason: self.to_string(),
        }
    }
}

/// Mesh/collision collaborator fed with generated tiles.
pub trait TerrainSink {
    /// Build collision (and any render geometry) for a freshly resident tile.
    fn build(&mut self, tile: &Tile) -> Result<(), CollisionError>;

    /// Release geometry of an evicted tile.
    fn release(&mut self, pos: TilePos);
}

/// Sink that accepts every tile and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TerrainSink for NullSink {
    fn build(&mut self, _tile: &Tile) -> Result<(), CollisionError> {
        Ok(())
    }

    fn release(&mut self, _pos: TilePos) {}
}

/// Hand a tile to the collision collaborator.
///
/// Failure leaves the tile resident without collision.
pub fn attach_collision(sink: &mut dyn TerrainSink, tile: &mut Tile) {
    match sink.build(tile) {
        Ok(()) => tile.set_collision(true),
        Err(err) => {
            tile.set_collision(false);
            let err = err.for_tile(tile.position());
            warn!(tile = %tile.position(), error = %err, "Collision build failed, tile stays resident");
        }
    }
}

/// Builds complete tiles from the shared height sampler.
#[derive(Debug, Clone)]
pub struct TileGenerator {
    sampler: Arc<HeightSampler>,
    queries: TerrainQueries,
}

impl TileGenerator {
    /// Create a generator over a shared sampler.
    pub fn new(sampler: Arc<HeightSampler>) -> Self {
        let queries = TerrainQueries::new(Arc::clone(&sampler));
        Self { sampler, queries }
    }

    pub fn sampler(&self) -> &Arc<HeightSampler> {
        &self.sampler
    }

    /// Queries bound to the same sampler as generation.
    pub fn queries(&self) -> &TerrainQueries {
        &self.queries
    }

    /// Generate the full state of a tile.
    #[instrument(skip(self), fields(tile = %pos))]
    pub fn generate(&self, pos: TilePos) -> Tile {
        let config = self.sampler.config();
        let definition = self.sampler.classifier().definition(pos);
        let mut tile = Tile::new(pos, definition.id, config.resolution, config.tile_size);

        let roads: Vec<RoadSegment> =
            plan_road(self.sampler.classifier(), &config.roads, config.tile_size, pos)
                .into_iter()
                .collect();

        let blend = self.blend_weights(&roads);
        let mut heights = Heightmap::generate(&self.sampler, pos).into_heights();
        for (height, weight) in heights.iter_mut().zip(&blend) {
            *height -= config.roads.sink * f64::from(*weight);
        }
        tile.set_heights(heights, blend);
        tile.set_roads(roads);

        let resources = self.place_resources(&tile, definition);
        debug!(
            biome = ?definition.id,
            resources = resources.len(),
            roads = tile.roads().len(),
            "Tile generated"
        );
        tile.set_resources(resources);
        tile.set_generated();
        tile
    }

    /// Restore a tile from a persisted record, keeping its heights, resources
    /// and roads verbatim.
    ///
    /// Records whose height grid does not match the configured resolution are
    /// discarded and the tile is generated fresh.
    pub fn rehydrate(&self, record: &TileRecord) -> Tile {
        let config = self.sampler.config();
        let pos = record.position();
        let expected = config.resolution * config.resolution;
        if record.heights.len() != expected {
            warn!(
                tile = %pos,
                stored = record.heights.len(),
                expected,
                "Stored height grid has wrong size, regenerating"
            );
            return self.generate(pos);
        }

        let mut tile = Tile::new(pos, record.biome, config.resolution, config.tile_size);
        let blend = self.blend_weights(&record.roads);
        tile.set_heights(record.heights.clone(), blend);
        tile.set_roads(record.roads.clone());
        tile.set_resources(record.resources.clone());
        tile.touch(record.last_active_ms);
        tile.set_generated();
        tile
    }

    fn blend_weights(&self, roads: &[RoadSegment]) -> Vec<f32> {
        let config = self.sampler.config();
        let resolution = config.resolution;
        let mut blend = Vec::with_capacity(resolution * resolution);
        for iz in 0..resolution {
            let lz = vertex_offset(config.tile_size, resolution, iz);
            for ix in 0..resolution {
                let lx = vertex_offset(config.tile_size, resolution, ix);
                blend.push(road_weight(roads, &config.roads, lx, lz) as f32);
            }
        }
        blend
    }

    fn place_resources(&self, tile: &Tile, definition: &BiomeDefinition) -> Vec<ResourceNode> {
        let mut nodes = Vec::new();
        for &kind in &definition.resources {
            let mut rng = tile_rng(tile.seed(), resource_salt(kind));
            let budget = resource_budget(kind, definition, &mut rng);
            let mut placed = 0;
            for _ in 0..budget * ATTEMPTS_PER_RESOURCE {
                if placed == budget {
                    break;
                }
                let lx = rng.gen_range(0.0..tile.tile_size());
                let lz = rng.gen_range(0.0..tile.tile_size());
                if on_road(tile.roads(), lx, lz) {
                    continue;
                }
                let (ox, oz) = tile.position().origin(tile.tile_size());
                let Some(y) = self.accept_candidate(definition, ox + lx, oz + lz) else {
                    continue;
                };
                nodes.push(ResourceNode {
                    id: format!("{}_{}_{}", tile.key(), kind, placed),
                    kind,
                    position: [ox + lx, y, oz + lz],
                });
                placed += 1;
            }
        }
        nodes
    }

    /// Height of an acceptable candidate, or `None` when rejected.
    ///
    /// Nothing is ever placed below the water line. Water biomes accept
    /// shoreline points that are gentle enough; land biomes require a walkable
    /// point.
    fn accept_candidate(&self, definition: &BiomeDefinition, x: f64, z: f64) -> Option<f64> {
        let height = self.sampler.height_with(definition, x, z);
        if height < self.sampler.water_height(definition) {
            return None;
        }
        let accepted = if definition.is_water {
            self.sampler.slope_at(x, z, self.queries.probe()) <= definition.max_slope
        } else {
            self.queries.is_walkable(x, z).walkable
        };
        accepted.then_some(height)
    }
}

fn resource_salt(kind: ResourceKind) -> u64 {
    0x5245_534F_0000 | (kind as u64 + 1)
}

/// Number of nodes of `kind` to place in a tile of `biome`.
fn resource_budget(kind: ResourceKind, biome: &BiomeDefinition, rng: &mut impl Rng) -> usize {
    match kind {
        ResourceKind::Tree => match biome.id {
            BiomeId::Forest => 12,
            BiomeId::Meadow => 6,
            _ => 4,
        },
        ResourceKind::Rock => match biome.id {
            BiomeId::Mountains => 8,
            _ => 4,
        },
        ResourceKind::Herb => 3,
        ResourceKind::Ore => match biome.id {
            BiomeId::Wasteland | BiomeId::Mountains => 6,
            _ => 3,
        },
        ResourceKind::Fish if biome.is_water => 5,
        ResourceKind::Fish => 0,
        ResourceKind::Gem => usize::from(rng.gen_bool(GEM_CHANCE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use chrono::Utc;

    fn generator() -> TileGenerator {
        TileGenerator::new(Arc::new(HeightSampler::new(Arc::new(WorldConfig::default()))))
    }

    fn find_tile(generator: &TileGenerator, biome: BiomeId) -> TilePos {
        (-40..=40)
            .flat_map(|x| (-40..=40).map(move |z| TilePos::new(x, z)))
            .find(|pos| generator.sampler().classifier().classify(pos.x, pos.z) == biome)
            .expect("biome present in search window")
    }

    struct FailingSink;

    impl TerrainSink for FailingSink {
        fn build(&mut self, _tile: &Tile) -> Result<(), CollisionError> {
            Err(CollisionError::Unavailable)
        }

        fn release(&mut self, _pos: TilePos) {}
    }

    #[test]
    fn generation_is_deterministic() {
        let generator = generator();
        let a = generator.generate(TilePos::new(6, -3));
        let b = generator.generate(TilePos::new(6, -3));
        assert_eq!(a.heights(), b.heights());
        assert_eq!(a.resources(), b.resources());
        assert_eq!(a.roads(), b.roads());
        assert_eq!(a.biome(), b.biome());
    }

    #[test]
    fn generated_tile_is_complete() {
        let generator = generator();
        let tile = generator.generate(TilePos::new(3, 1));
        assert_eq!(tile.heights().len(), 32 * 32);
        assert_eq!(tile.road_blend().len(), 32 * 32);
        assert_eq!(tile.status(), crate::tile::TileStatus::Generated);
        assert!(!tile.needs_save());
        for node in tile.resources() {
            assert!(node.id.starts_with("3_1_"));
        }
    }

    #[test]
    fn roads_sink_terrain_under_them() {
        let generator = generator();
        let pos = TilePos::new(5, 0);
        let tile = generator.generate(pos);
        assert_eq!(tile.roads().len(), 1);
        let raw = Heightmap::generate(generator.sampler(), pos);
        let mut sunk = 0;
        for (i, weight) in tile.road_blend().iter().enumerate() {
            let expected = raw.heights()[i] - 0.15 * f64::from(*weight);
            assert!((tile.heights()[i] - expected).abs() < 1e-9);
            if *weight > 0.99 {
                sunk += 1;
            }
        }
        assert!(sunk > 0);
    }

    #[test]
    fn resources_avoid_water_and_roads() {
        let generator = generator();
        let queries = generator.queries();
        for x in -6..6 {
            for z in -6..6 {
                let tile = generator.generate(TilePos::new(x, z));
                let (ox, oz) = tile.position().origin(100.0);
                for node in tile.resources() {
                    let [px, py, pz] = node.position;
                    let info = queries.terrain_info_at(px, pz);
                    assert!(!info.underwater, "{} placed underwater", node.id);
                    assert_eq!(py, info.height);
                    assert!(!on_road(tile.roads(), px - ox, pz - oz));
                    if info.biome != BiomeId::Lake {
                        assert!(info.walkable, "{} not walkable", node.id);
                    }
                }
            }
        }
    }

    #[test]
    fn fish_only_in_water_biomes() {
        let generator = generator();
        let lake = generator.generate(find_tile(&generator, BiomeId::Lake));
        for node in lake.resources() {
            let [px, _, pz] = node.position;
            assert!(!generator.queries().terrain_info_at(px, pz).underwater);
        }
        let forest = generator.generate(find_tile(&generator, BiomeId::Forest));
        assert!(forest
            .resources()
            .iter()
            .all(|node| node.kind != ResourceKind::Fish));
    }

    #[test]
    fn forest_has_more_trees_than_plains_budget() {
        let def = crate::biome::default_biomes()
            .into_iter()
            .find(|d| d.id == BiomeId::Forest)
            .unwrap();
        let mut rng = tile_rng(1, 2);
        assert_eq!(resource_budget(ResourceKind::Tree, &def, &mut rng), 12);
        assert_eq!(resource_budget(ResourceKind::Fish, &def, &mut rng), 0);
        assert!(resource_budget(ResourceKind::Gem, &def, &mut rng) <= 1);
    }

    #[test]
    fn rehydrate_keeps_stored_state() {
        let generator = generator();
        let mut tile = generator.generate(TilePos::new(7, 2));
        if let Some(first) = tile.resources().first().map(|n| n.id.clone()) {
            tile.remove_resource(&first);
        }
        let record = TileRecord::from_tile(&tile, 3, Utc::now());
        let restored = generator.rehydrate(&record);
        assert_eq!(restored.heights(), tile.heights());
        assert_eq!(restored.resources(), tile.resources());
        assert_eq!(restored.roads(), tile.roads());
        assert_eq!(restored.road_blend(), tile.road_blend());
    }

    #[test]
    fn rehydrate_regenerates_mismatched_grid() {
        let generator = generator();
        let tile = generator.generate(TilePos::new(-2, 9));
        let mut record = TileRecord::from_tile(&tile, 1, Utc::now());
        record.heights.truncate(10);
        let restored = generator.rehydrate(&record);
        assert_eq!(restored.heights(), tile.heights());
    }

    #[test]
    fn collision_failure_keeps_tile() {
        let generator = generator();
        let mut tile = generator.generate(TilePos::new(0, 0));
        attach_collision(&mut FailingSink, &mut tile);
        assert!(!tile.has_collision());
        attach_collision(&mut NullSink, &mut tile);
        assert!(tile.has_collision());
    }
}
