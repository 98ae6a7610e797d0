//! Heightmap generation for terrain.
//!
//! [`HeightSampler`] turns the height noise field into metres using the biome
//! of the tile containing each sample. One instance is shared by tile
//! generation, walkability queries and spawn sampling so geometry and gameplay
//! always agree.

use std::sync::Arc;

use tileworld_core::TilePos;

use crate::biome::{BiomeClassifier, BiomeDefinition};
use crate::config::WorldConfig;
use crate::noise::{NoiseConfig, NoiseField};
use crate::tile::vertex_offset;

/// Biome-aware height function over continuous world coordinates.
#[derive(Debug)]
pub struct HeightSampler {
    config: Arc<WorldConfig>,
    noise: NoiseField,
    classifier: BiomeClassifier,
}

impl HeightSampler {
    /// Build the sampler (and its classifier) from configuration.
    pub fn new(config: Arc<WorldConfig>) -> Self {
        let classifier = BiomeClassifier::new(&config);
        Self {
            config,
            noise: NoiseField::new(NoiseConfig::height()),
            classifier,
        }
    }

    /// Configuration this sampler was built from.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Classifier used for every biome lookup.
    pub fn classifier(&self) -> &BiomeClassifier {
        &self.classifier
    }

    /// Tile containing world point `(x, z)`.
    pub fn tile_at(&self, x: f64, z: f64) -> TilePos {
        TilePos::from_world(x, z, self.config.tile_size)
    }

    /// Biome definition of the tile containing `(x, z)`.
    pub fn biome_at(&self, x: f64, z: f64) -> &BiomeDefinition {
        self.classifier.definition(self.tile_at(x, z))
    }

    /// Normalized height noise in `[-1, 1]`.
    pub fn height_noise(&self, x: f64, z: f64) -> f64 {
        let scale = self.config.height_noise_scale;
        self.noise.sample_2d(x * scale, z * scale)
    }

    /// Terrain height in metres at world point `(x, z)`.
    pub fn height_at(&self, x: f64, z: f64) -> f64 {
        self.height_with(self.biome_at(x, z), x, z)
    }

    /// Terrain height at `(x, z)` using an already resolved biome definition.
    pub fn height_with(&self, biome: &BiomeDefinition, x: f64, z: f64) -> f64 {
        let shaped = (self.height_noise(x, z) * biome.terrain_multiplier).clamp(-1.0, 1.0);
        let t = (shaped + 1.0) * 0.5;
        let fraction = biome.height_min + t * (biome.height_max - biome.height_min);
        fraction * self.config.vertical_scale()
    }

    /// Absolute water height of a biome in metres.
    pub fn water_height(&self, biome: &BiomeDefinition) -> f64 {
        biome.water_level * self.config.vertical_scale()
    }

    /// Steepest of the four axis-aligned finite differences around `(x, z)`,
    /// divided by the probe distance.
    ///
    /// Non-positive probes fall back to the configured probe distance.
    pub fn slope_at(&self, x: f64, z: f64, probe: f64) -> f64 {
        let probe = if probe > 0.0 {
            probe
        } else {
            self.config.slope_probe
        };
        let centre = self.height_at(x, z);
        [
            self.height_at(x + probe, z),
            self.height_at(x - probe, z),
            self.height_at(x, z + probe),
            self.height_at(x, z - probe),
        ]
        .into_iter()
        .map(|h| (h - centre).abs())
        .fold(0.0, f64::max)
            / probe
    }
}

/// Height samples for one tile, flattened row-major by z then x.
#[derive(Debug, Clone, PartialEq)]
pub struct Heightmap {
    resolution: usize,
    heights: Vec<f64>,
}

impl Heightmap {
    /// Sample the `resolution²` vertex grid of `pos`.
    ///
    /// Vertex `i` sits at local offset `i * tile_size / (resolution - 1)`, so the
    /// last row and column coincide with the neighbouring tile's first ones.
    pub fn generate(sampler: &HeightSampler, pos: TilePos) -> Self {
        let config = sampler.config();
        let resolution = config.resolution;
        let (ox, oz) = pos.origin(config.tile_size);
        let mut heights = Vec::with_capacity(resolution * resolution);
        for iz in 0..resolution {
            let wz = oz + vertex_offset(config.tile_size, resolution, iz);
            for ix in 0..resolution {
                let wx = ox + vertex_offset(config.tile_size, resolution, ix);
                heights.push(sampler.height_at(wx, wz));
            }
        }
        Self {
            resolution,
            heights,
        }
    }

    /// Samples per edge.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Height at grid index `(ix, iz)`, or `None` outside the grid.
    pub fn get(&self, ix: usize, iz: usize) -> Option<f64> {
        if ix >= self.resolution || iz >= self.resolution {
            return None;
        }
        self.heights.get(iz * self.resolution + ix).copied()
    }

    /// Flattened samples.
    pub fn heights(&self) -> &[f64] {
        &self.heights
    }

    /// Consume the map, returning the flattened samples.
    pub fn into_heights(self) -> Vec<f64> {
        self.heights
    }

    /// Get the minimum height in this heightmap.
    pub fn min_height(&self) -> f64 {
        self.heights.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Get the maximum height in this heightmap.
    pub fn max_height(&self) -> f64 {
        self.heights.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Get the average height in this heightmap.
    pub fn avg_height(&self) -> f64 {
        if self.heights.is_empty() {
            return 0.0;
        }
        self.heights.iter().sum::<f64>() / self.heights.len() as f64
    }
}

/// Check that two adjacent tiles agree along their shared edge.
///
/// Returns `false` when the tiles are not edge-adjacent or any pair of shared
/// samples differs by more than `tolerance` metres.
pub fn check_seam_continuity(
    sampler: &HeightSampler,
    first: TilePos,
    second: TilePos,
    tolerance: f64,
) -> bool {
    let a = Heightmap::generate(sampler, first);
    let b = Heightmap::generate(sampler, second);
    let last = a.resolution() - 1;

    let pairs: Vec<(Option<f64>, Option<f64>)> =
        if second.x == first.x + 1 && second.z == first.z {
            (0..a.resolution())
                .map(|i| (a.get(last, i), b.get(0, i)))
                .collect()
        } else if second.x == first.x && second.z == first.z + 1 {
            (0..a.resolution())
                .map(|i| (a.get(i, last), b.get(i, 0)))
                .collect()
        } else {
            return false;
        };

    pairs.into_iter().all(|pair| match pair {
        (Some(left), Some(right)) => (left - right).abs() <= tolerance,
        _ => false,
    })
}
