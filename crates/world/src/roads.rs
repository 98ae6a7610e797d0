//! Road placement toward starter towns.

use tileworld_core::TilePos;

use crate::biome::BiomeClassifier;
use crate::config::RoadRules;
use crate::tile::RoadSegment;

/// Plan the (at most one) road segment for a tile.
///
/// A tile gets a road when its nearest starter town lies strictly farther than
/// `min_town_distance` and no farther than `max_town_distance`. The segment runs
/// through the tile centre, pointing at the town, and spans the tile's
/// inscribed circle.
pub fn plan_road(
    classifier: &BiomeClassifier,
    rules: &RoadRules,
    tile_size: f64,
    pos: TilePos,
) -> Option<RoadSegment> {
    let (town, distance) = classifier.nearest_town(pos)?;
    if distance <= rules.min_town_distance || distance > rules.max_town_distance {
        return None;
    }

    let dx = (town.tile.x - pos.x) as f64;
    let dz = (town.tile.z - pos.z) as f64;
    let (ux, uz) = (dx / distance, dz / distance);
    let half = tile_size * 0.5;

    Some(RoadSegment {
        start: [half - ux * half, half - uz * half],
        end: [half + ux * half, half + uz * half],
        width: rules.width,
    })
}

/// Colour blend weight of a local point against a set of roads.
///
/// 1.0 on the road surface, falling linearly to 0.0 over `blend_margin` metres
/// beyond the road edge.
pub fn road_weight(roads: &[RoadSegment], rules: &RoadRules, local_x: f64, local_z: f64) -> f64 {
    roads
        .iter()
        .map(|road| {
            let beyond_edge = road.distance_to(local_x, local_z) - road.width * 0.5;
            if beyond_edge <= 0.0 {
                1.0
            } else if rules.blend_margin <= 0.0 {
                0.0
            } else {
                (1.0 - beyond_edge / rules.blend_margin).clamp(0.0, 1.0)
            }
        })
        .fold(0.0, f64::max)
}

/// Whether a local point lies on any road surface.
pub fn on_road(roads: &[RoadSegment], local_x: f64, local_z: f64) -> bool {
    roads
        .iter()
        .any(|road| road.distance_to(local_x, local_z) <= road.width * 0.5)
}

/// Distance from a local point to the nearest road centre line.
pub fn distance_to_roads(roads: &[RoadSegment], local_x: f64, local_z: f64) -> f64 {
    roads
        .iter()
        .map(|road| road.distance_to(local_x, local_z))
        .fold(f64::INFINITY, f64::min)
}
