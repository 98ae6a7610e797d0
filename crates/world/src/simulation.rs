//! Which resident tiles receive full gameplay simulation.

use std::collections::BTreeSet;

use tileworld_core::TilePos;

/// Split of the resident set into simulated and rendered-only tiles.
///
/// A tile is simulated iff it lies in at least one player's core range. Ring
/// membership keeps a tile resident but never simulates it.
#[derive(Debug, Default, Clone)]
pub struct SimulationGate {
    simulated: BTreeSet<TilePos>,
    rendered_only: BTreeSet<TilePos>,
}

impl SimulationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild both sets from this pass's core tiles and resident tiles.
    pub fn recompute(
        &mut self,
        core: impl IntoIterator<Item = TilePos>,
        resident: impl IntoIterator<Item = TilePos>,
    ) {
        self.simulated = core.into_iter().collect();
        self.rendered_only = resident
            .into_iter()
            .filter(|pos| !self.simulated.contains(pos))
            .collect();
    }

    pub fn is_simulated(&self, pos: TilePos) -> bool {
        self.simulated.contains(&pos)
    }

    /// Simulated tiles in position order.
    pub fn simulated_tiles(&self) -> impl Iterator<Item = TilePos> + '_ {
        self.simulated.iter().copied()
    }

    /// Resident tiles kept only for rendering continuity.
    pub fn rendered_only(&self) -> impl Iterator<Item = TilePos> + '_ {
        self.rendered_only.iter().copied()
    }

    pub fn simulated_len(&self) -> usize {
        self.simulated.len()
    }

    pub fn rendered_only_len(&self) -> usize {
        self.rendered_only.len()
    }

    /// Mobs may only spawn on simulated tiles.
    pub fn allows_mob_spawns(&self, pos: TilePos) -> bool {
        self.is_simulated(pos)
    }

    /// Harvested resources only respawn on simulated tiles.
    pub fn allows_resource_respawn(&self, pos: TilePos) -> bool {
        self.is_simulated(pos)
    }
}
