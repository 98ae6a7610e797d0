//! Tile state: the unit of residency, generation and persistence.

use serde::{Deserialize, Serialize};
use std::fmt;
use tileworld_core::TilePos;

use crate::biome::BiomeId;

/// Resource node type tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Tree,
    Rock,
    Herb,
    Ore,
    Fish,
    Gem,
}

impl ResourceKind {
    /// Canonical string key, also used inside resource ids.
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Tree => "tree",
            ResourceKind::Rock => "rock",
            ResourceKind::Herb => "herb",
            ResourceKind::Ore => "ore",
            ResourceKind::Fish => "fish",
            ResourceKind::Gem => "gem",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Harvestable node placed during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// `"{tile_key}_{kind}_{index}"`.
    pub id: String,
    pub kind: ResourceKind,
    /// World-space position `[x, y, z]`.
    pub position: [f64; 3],
}

/// Straight road piece in tile-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadSegment {
    /// Local `[x, z]` start point.
    pub start: [f64; 2],
    /// Local `[x, z]` end point.
    pub end: [f64; 2],
    /// Width in metres.
    pub width: f64,
}

impl RoadSegment {
    /// Shortest distance from a local point to the segment's centre line.
    pub fn distance_to(&self, local_x: f64, local_z: f64) -> f64 {
        distance_to_segment([local_x, local_z], self.start, self.end)
    }
}

/// Local offset of vertex `index` along one tile edge.
///
/// Computed as a product before the division so the last vertex lands exactly
/// on the next tile's origin.
#[inline]
pub fn vertex_offset(tile_size: f64, resolution: usize, index: usize) -> f64 {
    tile_size * index as f64 / (resolution - 1) as f64
}

/// Point-to-segment distance in 2D.
pub fn distance_to_segment(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let (abx, abz) = (b[0] - a[0], b[1] - a[1]);
    let (apx, apz) = (p[0] - a[0], p[1] - a[1]);
    let len_sq = abx * abx + abz * abz;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        ((apx * abx + apz * abz) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cz) = (a[0] + abx * t, a[1] + abz * t);
    ((p[0] - cx).powi(2) + (p[1] - cz).powi(2)).sqrt()
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Dirty flags set whenever persisted tile contents change.
    pub struct DirtyFlags: u8 {
        const TERRAIN = 0b0000_0001;
        const RESOURCES = 0b0000_0010;
        const STATE = 0b0000_0100;
    }
}

impl Default for DirtyFlags {
    fn default() -> Self {
        DirtyFlags::empty()
    }
}

/// Whether a tile's contents have been produced yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileStatus {
    Ungenerated,
    Generated,
}

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl TileBounds {
    fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    fn include(&mut self, p: [f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    /// Extent along world x.
    pub fn extent_x(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    /// Extent along world z.
    pub fn extent_z(&self) -> f64 {
        self.max[2] - self.min[2]
    }
}

/// One resident square of terrain.
#[derive(Debug, Clone)]
pub struct Tile {
    pos: TilePos,
    biome: BiomeId,
    resolution: usize,
    tile_size: f64,
    heights: Vec<f64>,
    road_blend: Vec<f32>,
    resources: Vec<ResourceNode>,
    roads: Vec<RoadSegment>,
    dirty: DirtyFlags,
    last_active_ms: i64,
    ref_count: u32,
    seed: u64,
    status: TileStatus,
    simulated: bool,
    has_collision: bool,
}

impl Tile {
    /// Allocate an ungenerated tile with a flat height grid.
    pub fn new(pos: TilePos, biome: BiomeId, resolution: usize, tile_size: f64) -> Self {
        let samples = resolution * resolution;
        Self {
            pos,
            biome,
            resolution,
            tile_size,
            heights: vec![0.0; samples],
            road_blend: vec![0.0; samples],
            resources: Vec::new(),
            roads: Vec::new(),
            dirty: DirtyFlags::empty(),
            last_active_ms: 0,
            ref_count: 0,
            seed: pos.seed(),
            status: TileStatus::Ungenerated,
            simulated: false,
            has_collision: false,
        }
    }

    #[inline]
    pub fn position(&self) -> TilePos {
        self.pos
    }

    /// `"{x}_{z}"`.
    pub fn key(&self) -> String {
        self.pos.key()
    }

    #[inline]
    pub fn biome(&self) -> BiomeId {
        self.biome
    }

    /// Samples per edge.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Edge length in metres.
    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Local `(x, z)` offset of grid vertex `(ix, iz)`.
    pub fn vertex_local(&self, ix: usize, iz: usize) -> (f64, f64) {
        (
            vertex_offset(self.tile_size, self.resolution, ix),
            vertex_offset(self.tile_size, self.resolution, iz),
        )
    }

    /// Flattened height grid, row-major by z then x.
    pub fn heights(&self) -> &[f64] {
        &self.heights
    }

    /// Height sample at grid index `(ix, iz)`.
    pub fn height(&self, ix: usize, iz: usize) -> f64 {
        self.heights[iz * self.resolution + ix]
    }

    /// Per-vertex road colour blend weights in `[0, 1]`.
    pub fn road_blend(&self) -> &[f32] {
        &self.road_blend
    }

    pub fn resources(&self) -> &[ResourceNode] {
        &self.resources
    }

    pub fn roads(&self) -> &[RoadSegment] {
        &self.roads
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn status(&self) -> TileStatus {
        self.status
    }

    /// Whether the tile currently receives full gameplay simulation.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn has_collision(&self) -> bool {
        self.has_collision
    }

    /// Number of players whose required set includes this tile.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Wall-clock milliseconds of the last pass that required this tile.
    pub fn last_active_ms(&self) -> i64 {
        self.last_active_ms
    }

    /// Whether the tile has unsaved changes.
    pub fn needs_save(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_flags(&self) -> DirtyFlags {
        self.dirty
    }

    /// Mark contents changed since the last successful save.
    pub fn mark_dirty(&mut self, flags: DirtyFlags) {
        self.dirty.insert(flags);
    }

    /// Consume and return the current dirty flags.
    pub fn take_dirty_flags(&mut self) -> DirtyFlags {
        let flags = self.dirty;
        self.dirty = DirtyFlags::empty();
        flags
    }

    /// Remove a resource node by id, marking the tile dirty.
    pub fn remove_resource(&mut self, id: &str) -> Option<ResourceNode> {
        let index = self.resources.iter().position(|node| node.id == id)?;
        self.dirty.insert(DirtyFlags::RESOURCES);
        Some(self.resources.remove(index))
    }

    /// World-space bounding box of the generated geometry: height grid,
    /// resource nodes and road endpoints.
    pub fn bounds(&self) -> TileBounds {
        let (ox, oz) = self.pos.origin(self.tile_size);
        let mut bounds = TileBounds::empty();
        for iz in 0..self.resolution {
            for ix in 0..self.resolution {
                let (lx, lz) = self.vertex_local(ix, iz);
                bounds.include([ox + lx, self.height(ix, iz), oz + lz]);
            }
        }
        for node in &self.resources {
            bounds.include(node.position);
        }
        for road in &self.roads {
            for [lx, lz] in [road.start, road.end] {
                bounds.include([ox + lx, bounds.min[1], oz + lz]);
            }
        }
        bounds
    }

    pub(crate) fn set_heights(&mut self, heights: Vec<f64>, road_blend: Vec<f32>) {
        debug_assert_eq!(heights.len(), self.resolution * self.resolution);
        debug_assert_eq!(road_blend.len(), heights.len());
        self.heights = heights;
        self.road_blend = road_blend;
    }

    pub(crate) fn set_resources(&mut self, resources: Vec<ResourceNode>) {
        self.resources = resources;
    }

    pub(crate) fn set_roads(&mut self, roads: Vec<RoadSegment>) {
        self.roads = roads;
    }

    pub(crate) fn set_generated(&mut self) {
        self.status = TileStatus::Generated;
    }

    pub(crate) fn set_ref_count(&mut self, count: u32) {
        self.ref_count = count;
    }

    pub(crate) fn set_simulated(&mut self, simulated: bool) {
        self.simulated = simulated;
    }

    pub(crate) fn set_collision(&mut self, has_collision: bool) {
        self.has_collision = has_collision;
    }

    pub(crate) fn touch(&mut self, now_ms: i64) {
        self.last_active_ms = now_ms;
    }
}
