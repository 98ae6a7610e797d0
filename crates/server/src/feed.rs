//! Player position feed.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tileworld_core::{PlayerId, PlayerPosition};

/// Source of the current player positions, sampled once per lifecycle pass.
pub trait PositionFeed: Send + Sync {
    /// Visit every connected player's latest position.
    fn for_each_player(&self, visit: &mut dyn FnMut(PlayerPosition));

    /// Collect the current positions.
    fn snapshot(&self) -> Vec<PlayerPosition> {
        let mut players = Vec::new();
        self.for_each_player(&mut |player| players.push(player));
        players
    }
}

/// Position table shared between whatever tracks players and the host.
///
/// Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct SharedPositions {
    players: Arc<RwLock<BTreeMap<PlayerId, PlayerPosition>>>,
}

impl SharedPositions {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest position of a player, adding it if unknown.
    pub fn update(&self, id: PlayerId, x: f64, z: f64) {
        self.players
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, PlayerPosition::new(id, x, z));
    }

    /// Drop a disconnected player. Returns its last position.
    pub fn remove(&self, id: PlayerId) -> Option<PlayerPosition> {
        self.players
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Number of connected players.
    pub fn len(&self) -> usize {
        self.players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when no player is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PositionFeed for SharedPositions {
    fn for_each_player(&self, visit: &mut dyn FnMut(PlayerPosition)) {
        let players = self.players.read().unwrap_or_else(PoisonError::into_inner);
        for player in players.values() {
            visit(*player);
        }
    }
}
