//! Multi-player tile residency.
//!
//! Each pass rebuilds every player's interest from scratch, derives global
//! reference counts, materializes newly required tiles and evicts tiles nobody
//! requires. Counts are never adjusted incrementally, so they cannot drift.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::Utc;
use tileworld_core::{PlayerId, PlayerPosition, SimTick, TilePos};
use tracing::{debug, error, instrument, warn};

use crate::config::WorldConfig;
use crate::persist::{TileRecord, TileStore};
use crate::simulation::SimulationGate;
use crate::storage::{PendingRecord, ResidentTiles};
use crate::terrain::{attach_collision, TerrainSink, TileGenerator};
use crate::tile::{DirtyFlags, Tile};

/// Tiles one player requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInterest {
    /// Tile the player stands in.
    pub centre: TilePos,
    /// Core range: resident and simulated.
    pub core: BTreeSet<TilePos>,
    /// Ring range minus the core: resident, rendered only.
    pub ring: BTreeSet<TilePos>,
}

impl PlayerInterest {
    /// Interest of a player standing in `centre`.
    pub fn around(centre: TilePos, core_radius: i32, ring_radius: i32) -> Self {
        let core: BTreeSet<TilePos> = centre.square(core_radius).collect();
        let ring = centre
            .square(ring_radius)
            .filter(|pos| !core.contains(pos))
            .collect();
        Self { centre, core, ring }
    }

    /// Every tile the player keeps resident.
    pub fn required(&self) -> impl Iterator<Item = TilePos> + '_ {
        self.core.iter().chain(self.ring.iter()).copied()
    }
}

/// Observable state of a tile key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Absent,
    /// Resident and inside some player's core range.
    Simulated,
    /// Resident for rendering continuity only.
    RenderedOnly,
    /// Evicted with unsaved state still queued for persistence.
    Evicting,
    /// Required, waiting for a deferred store read.
    Loading,
}

/// Where a newly resident tile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
    Outbox,
    Archive,
    Store,
    Generated,
}

/// How a pass reaches saved tiles that are neither queued nor archived.
#[derive(Clone, Copy)]
pub enum StoreAccess<'a> {
    /// Nothing saved; missing tiles are generated.
    None,
    /// Read the store during the pass.
    Inline(&'a dyn TileStore),
    /// The caller reads the store. Keys are listed in
    /// [`LifecycleReport::load_requests`] and stay absent until
    /// [`ChunkLifecycleManager::complete_load`] delivers them.
    Deferred,
}

/// Summary of one lifecycle pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    pub tick: u64,
    pub players: usize,
    pub required: usize,
    pub generated: usize,
    pub loaded: usize,
    pub restored: usize,
    pub evicted: usize,
    /// Evicted tiles whose unsaved state went to the outbox.
    pub queued: usize,
    pub resident: usize,
    pub simulated: usize,
    pub rendered_only: usize,
    /// Keys whose deferred store read started this pass.
    pub load_requests: Vec<TilePos>,
    /// Deferred reads still outstanding after the pass.
    pub loading: usize,
}

/// Owner of the resident tile table and per-tile reference counts.
pub struct ChunkLifecycleManager {
    core_radius: i32,
    ring_radius: i32,
    tile_size: f64,
    tiles: ResidentTiles,
    interest: BTreeMap<PlayerId, PlayerInterest>,
    ref_counts: BTreeMap<TilePos, u32>,
    core_counts: BTreeMap<TilePos, u32>,
    loading: BTreeSet<TilePos>,
    gate: SimulationGate,
    tick: SimTick,
}

impl ChunkLifecycleManager {
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            core_radius: config.core_radius,
            ring_radius: config.ring_radius,
            tile_size: config.tile_size,
            tiles: ResidentTiles::new(config.archive_capacity),
            interest: BTreeMap::new(),
            ref_counts: BTreeMap::new(),
            core_counts: BTreeMap::new(),
            loading: BTreeSet::new(),
            gate: SimulationGate::new(),
            tick: SimTick::ZERO,
        }
    }

    /// Run one lifecycle pass for the given player positions.
    ///
    /// `store` decides how tiles that are neither queued nor archived are
    /// found; `now_ms` stamps `last_active` on every required tile.
    #[instrument(skip_all, fields(players = players.len()))]
    pub fn run_pass(
        &mut self,
        players: &[PlayerPosition],
        generator: &TileGenerator,
        sink: &mut dyn TerrainSink,
        store: StoreAccess<'_>,
        now_ms: i64,
    ) -> LifecycleReport {
        self.tick = self.tick.advance(1);
        let mut report = LifecycleReport {
            tick: self.tick.0,
            players: players.len(),
            ..LifecycleReport::default()
        };

        self.rebuild_interest(players);
        report.required = self.ref_counts.len();

        let required: Vec<TilePos> = self.ref_counts.keys().copied().collect();
        for pos in required {
            if self.tiles.contains(pos) || self.loading.contains(&pos) {
                continue;
            }
            let Some((mut tile, source)) = self.materialize(pos, generator, store) else {
                self.loading.insert(pos);
                report.load_requests.push(pos);
                continue;
            };
            attach_collision(sink, &mut tile);
            match source {
                TileSource::Generated => report.generated += 1,
                TileSource::Store => report.loaded += 1,
                TileSource::Outbox | TileSource::Archive => report.restored += 1,
            }
            self.tiles.ensure_with(pos, || tile);
        }

        for tile in self.tiles.iter_mut() {
            let pos = tile.position();
            let count = self.ref_counts.get(&pos).copied().unwrap_or(0);
            tile.set_ref_count(count);
            tile.set_simulated(self.core_counts.contains_key(&pos));
            if count > 0 {
                tile.touch(now_ms);
            }
        }

        let unreferenced: Vec<TilePos> = self
            .tiles
            .positions()
            .filter(|pos| !self.ref_counts.contains_key(pos))
            .collect();
        for pos in unreferenced {
            match self.evict(pos, sink) {
                Some(true) => {
                    report.evicted += 1;
                    report.queued += 1;
                }
                Some(false) => report.evicted += 1,
                None => {}
            }
        }

        self.refresh_gate();
        report.resident = self.tiles.len();
        report.simulated = self.gate.simulated_len();
        report.rendered_only = self.gate.rendered_only_len();
        report.loading = self.loading.len();
        debug!(?report, "Lifecycle pass complete");
        report
    }

    /// Deliver a deferred store read for `pos`.
    ///
    /// The tile becomes resident only if some player still requires it. An
    /// empty or failed read generates it instead. Returns where the tile came
    /// from, or `None` when the result was discarded.
    pub fn complete_load(
        &mut self,
        pos: TilePos,
        result: Result<Option<TileRecord>>,
        generator: &TileGenerator,
        sink: &mut dyn TerrainSink,
        now_ms: i64,
    ) -> Option<TileSource> {
        if !self.loading.remove(&pos) {
            warn!(tile = %pos, "Load result for a tile that was not loading");
            return None;
        }
        let count = self.ref_count(pos);
        if count == 0 || self.tiles.contains(pos) {
            debug!(tile = %pos, "Tile no longer required, dropping load result");
            return None;
        }

        let (mut tile, source) = match result {
            Ok(Some(record)) => (generator.rehydrate(&record), TileSource::Store),
            Ok(None) => (generator.generate(pos), TileSource::Generated),
            Err(err) => {
                warn!(tile = %pos, error = %format!("{err:#}"), "Failed to load tile, generating fresh");
                (generator.generate(pos), TileSource::Generated)
            }
        };
        attach_collision(sink, &mut tile);
        tile.set_ref_count(count);
        tile.set_simulated(self.core_counts.contains_key(&pos));
        tile.touch(now_ms);
        self.tiles.ensure_with(pos, || tile);
        self.refresh_gate();
        Some(source)
    }

    fn refresh_gate(&mut self) {
        self.gate.recompute(
            self.core_counts.keys().copied(),
            self.tiles.positions().collect::<Vec<_>>(),
        );
    }

    fn rebuild_interest(&mut self, players: &[PlayerPosition]) {
        self.interest.clear();
        self.ref_counts.clear();
        self.core_counts.clear();
        for player in players {
            let centre = TilePos::from_world(player.x, player.z, self.tile_size);
            let interest = PlayerInterest::around(centre, self.core_radius, self.ring_radius);
            if self.interest.contains_key(&player.id) {
                warn!(player = %player.id, "Duplicate player in position feed, keeping the last sample");
            }
            self.interest.insert(player.id, interest);
        }
        for interest in self.interest.values() {
            for pos in interest.required() {
                *self.ref_counts.entry(pos).or_insert(0) += 1;
            }
            for &pos in &interest.core {
                *self.core_counts.entry(pos).or_insert(0) += 1;
            }
        }
    }

    /// Bring a tile back from the outbox, the archive, storage, or generate it.
    ///
    /// `None` means the store read was left to the caller.
    fn materialize(
        &mut self,
        pos: TilePos,
        generator: &TileGenerator,
        store: StoreAccess<'_>,
    ) -> Option<(Tile, TileSource)> {
        if let Some(pending) = self.tiles.take_pending(pos) {
            let mut tile = generator.rehydrate(&pending.record);
            tile.mark_dirty(pending.flags);
            return Some((tile, TileSource::Outbox));
        }
        if let Some(tile) = self.tiles.take_archived(pos) {
            return Some((tile, TileSource::Archive));
        }
        match store {
            StoreAccess::None => {}
            StoreAccess::Deferred => return None,
            StoreAccess::Inline(store) => match store.load_tile(pos) {
                Ok(Some(record)) => {
                    return Some((generator.rehydrate(&record), TileSource::Store))
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(tile = %pos, error = %format!("{err:#}"), "Failed to load tile, generating fresh");
                }
            },
        }
        Some((generator.generate(pos), TileSource::Generated))
    }

    /// Evict an unreferenced tile.
    ///
    /// Returns `Some(true)` when unsaved state was queued, `Some(false)` for a
    /// clean eviction and `None` when the eviction was refused.
    fn evict(&mut self, pos: TilePos, sink: &mut dyn TerrainSink) -> Option<bool> {
        let count = self.ref_counts.get(&pos).copied().unwrap_or(0);
        if count > 0 {
            error!(tile = %pos, count, "Refusing to evict a referenced tile");
            debug_assert!(count == 0, "evicting tile {pos} with {count} references");
            return None;
        }

        let mut tile = self.tiles.remove(pos)?;
        sink.release(pos);
        tile.set_ref_count(0);
        tile.set_simulated(false);
        if tile.needs_save() {
            let flags = tile.take_dirty_flags();
            self.tiles.queue(PendingRecord {
                record: TileRecord::from_tile(&tile, 0, Utc::now()),
                flags,
                in_flight: None,
            });
            Some(true)
        } else {
            self.tiles.archive(tile);
            Some(false)
        }
    }

    /// Lifecycle state of a tile key.
    pub fn tile_state(&self, pos: TilePos) -> TileState {
        if self.tiles.contains(pos) {
            if self.gate.is_simulated(pos) {
                TileState::Simulated
            } else {
                TileState::RenderedOnly
            }
        } else if self.tiles.is_pending(pos) {
            TileState::Evicting
        } else if self.loading.contains(&pos) {
            TileState::Loading
        } else {
            TileState::Absent
        }
    }

    /// Number of players requiring `pos` as of the last pass.
    pub fn ref_count(&self, pos: TilePos) -> u32 {
        self.ref_counts.get(&pos).copied().unwrap_or(0)
    }

    /// Number of players whose core range holds `pos`.
    pub fn core_count(&self, pos: TilePos) -> u32 {
        self.core_counts.get(&pos).copied().unwrap_or(0)
    }

    pub fn interest(&self, player: PlayerId) -> Option<&PlayerInterest> {
        self.interest.get(&player)
    }

    pub fn tile(&self, pos: TilePos) -> Option<&Tile> {
        self.tiles.get(pos)
    }

    pub fn tile_mut(&mut self, pos: TilePos) -> Option<&mut Tile> {
        self.tiles.get_mut(pos)
    }

    pub fn tiles(&self) -> &ResidentTiles {
        &self.tiles
    }

    pub fn tiles_mut(&mut self) -> &mut ResidentTiles {
        &mut self.tiles
    }

    pub fn gate(&self) -> &SimulationGate {
        &self.gate
    }

    pub fn tick(&self) -> SimTick {
        self.tick
    }

    /// Deferred store reads not yet delivered.
    pub fn loading_len(&self) -> usize {
        self.loading.len()
    }

    /// Mark a resident tile dirty. Returns false when it is not resident.
    pub fn mark_dirty(&mut self, pos: TilePos, flags: DirtyFlags) -> bool {
        match self.tiles.get_mut(pos) {
            Some(tile) => {
                tile.mark_dirty(flags);
                true
            }
            None => false,
        }
    }
}
