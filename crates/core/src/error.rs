//! Error taxonomy for the tile world.

use thiserror::Error;

use crate::TilePos;

/// Errors surfaced by world collaborators.
///
/// None of these are fatal: callers log them and continue with the remaining
/// tiles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// A biome id was not present in the active biome table.
    #[error("unknown biome id `{0}`")]
    UnknownBiome(String),
    /// The collision collaborator failed to build geometry for a tile.
    #[error("collision build failed for tile {tile}: {reason}")]
    Collision {
        /// Tile whose collision failed.
        tile: TilePos,
        /// Collaborator-provided reason.
        reason: String,
    },
    /// The storage collaborator rejected a read or write.
    #[error("storage failure for tile {tile}: {reason}")]
    Storage {
        /// Tile whose record failed.
        tile: TilePos,
        /// Collaborator-provided reason.
        reason: String,
    },
    /// A tile key string could not be parsed.
    #[error("malformed tile key `{0}`")]
    MalformedKey(String),
}
