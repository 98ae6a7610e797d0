//! Bounding-box diagnostics for resident tiles.
//!
//! Log-only: nothing here blocks or mutates gameplay.

use tileworld_core::TilePos;
use tracing::{debug, warn};

use crate::config::WorldConfig;
use crate::tile::Tile;

/// Allowed horizontal extent as a multiple of the tile size.
const OVERSIZE_FACTOR: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnomalyKind {
    /// Horizontal extent exceeds the expected footprint.
    Oversized { extent_x: f64, extent_z: f64 },
    /// Geometry reaches outside the configured world bounds.
    OutOfBounds,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anomaly {
    pub tile: TilePos,
    pub kind: AnomalyKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyReport {
    pub checked: usize,
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Compare each tile's bounding box against the footprint and world bounds.
pub fn check_tiles<'a>(tiles: impl IntoIterator<Item = &'a Tile>, config: &WorldConfig) -> AnomalyReport {
    let limit = config.tile_size * OVERSIZE_FACTOR;
    let (min_x, min_z, max_x, max_z) = config.world_bounds.to_world(config.tile_size);
    let mut report = AnomalyReport::default();

    for tile in tiles {
        report.checked += 1;
        let bounds = tile.bounds();
        let (extent_x, extent_z) = (bounds.extent_x(), bounds.extent_z());
        if extent_x > limit || extent_z > limit {
            warn!(tile = %tile.position(), extent_x, extent_z, limit, "Tile bounding box oversized");
            report.anomalies.push(Anomaly {
                tile: tile.position(),
                kind: AnomalyKind::Oversized { extent_x, extent_z },
            });
        }
        if bounds.min[0] < min_x || bounds.min[2] < min_z || bounds.max[0] > max_x || bounds.max[2] > max_z {
            warn!(tile = %tile.position(), "Tile outside world bounds");
            report.anomalies.push(Anomaly {
                tile: tile.position(),
                kind: AnomalyKind::OutOfBounds,
            });
        }
    }

    debug!(checked = report.checked, anomalies = report.anomalies.len(), "Bounds check complete");
    report
}
