//! Single owner of one tile world.
//!
//! Wires one shared [`HeightSampler`] into tile generation and gameplay
//! queries, and owns the lifecycle manager and persistence scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tileworld_core::{PlayerPosition, TilePos};

use crate::anomaly::{check_tiles, AnomalyReport};
use crate::config::WorldConfig;
use crate::heightmap::HeightSampler;
use crate::lifecycle::{ChunkLifecycleManager, LifecycleReport, StoreAccess, TileSource, TileState};
use crate::persist::{TileRecord, TileStore};
use crate::queries::{SpawnPoint, TerrainInfo, TerrainQueries, Walkability};
use crate::scheduler::{
    FlushReport, PassKind, PersistBatch, PersistenceScheduler, DEFAULT_DIRTY_INTERVAL,
    DEFAULT_SNAPSHOT_INTERVAL,
};
use crate::simulation::SimulationGate;
use crate::terrain::{NullSink, TerrainSink, TileGenerator};
use crate::tile::{DirtyFlags, ResourceNode, Tile};

/// The tile world: generation, residency, queries and persistence state.
pub struct TileWorld {
    config: Arc<WorldConfig>,
    generator: TileGenerator,
    lifecycle: ChunkLifecycleManager,
    scheduler: PersistenceScheduler,
    sink: Box<dyn TerrainSink + Send>,
    store: Option<Arc<dyn TileStore>>,
}

impl TileWorld {
    /// World with default persistence intervals, no store and a null sink.
    pub fn new(config: WorldConfig) -> Self {
        let config = Arc::new(config);
        let sampler = Arc::new(HeightSampler::new(Arc::clone(&config)));
        Self {
            generator: TileGenerator::new(sampler),
            lifecycle: ChunkLifecycleManager::new(&config),
            scheduler: PersistenceScheduler::new(
                DEFAULT_DIRTY_INTERVAL,
                DEFAULT_SNAPSHOT_INTERVAL,
                Instant::now(),
            ),
            sink: Box::new(NullSink),
            store: None,
            config,
        }
    }

    /// Use `sink` as the mesh/collision collaborator.
    pub fn with_sink(mut self, sink: impl TerrainSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Read previously saved tiles from `store` during lifecycle passes.
    ///
    /// Passes block on the read. Hosts that must not block use
    /// [`TileWorld::run_lifecycle_pass_deferred`] and read the store themselves.
    pub fn with_store(mut self, store: Arc<dyn TileStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the persistence cadence; clocks restart at `now`.
    pub fn with_persistence_intervals(mut self, dirty: Duration, snapshot: Duration, now: Instant) -> Self {
        self.scheduler = PersistenceScheduler::new(dirty, snapshot, now);
        self
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Terrain queries sharing the generator's sampler.
    pub fn queries(&self) -> &TerrainQueries {
        self.generator.queries()
    }

    pub fn generator(&self) -> &TileGenerator {
        &self.generator
    }

    /// Lifecycle pass stamped with the current wall-clock time.
    pub fn run_lifecycle_pass(&mut self, players: &[PlayerPosition]) -> LifecycleReport {
        self.run_lifecycle_pass_at(players, Utc::now().timestamp_millis())
    }

    /// Lifecycle pass stamped with `now_ms`.
    pub fn run_lifecycle_pass_at(&mut self, players: &[PlayerPosition], now_ms: i64) -> LifecycleReport {
        let store = match self.store.as_deref() {
            Some(store) => StoreAccess::Inline(store),
            None => StoreAccess::None,
        };
        self.lifecycle
            .run_pass(players, &self.generator, self.sink.as_mut(), store, now_ms)
    }

    /// Lifecycle pass that never touches storage.
    ///
    /// Tiles that must come from the store are listed in
    /// [`LifecycleReport::load_requests`]; hand each read result to
    /// [`TileWorld::complete_load`].
    pub fn run_lifecycle_pass_deferred(&mut self, players: &[PlayerPosition]) -> LifecycleReport {
        self.lifecycle.run_pass(
            players,
            &self.generator,
            self.sink.as_mut(),
            StoreAccess::Deferred,
            Utc::now().timestamp_millis(),
        )
    }

    /// Materialize a tile whose deferred read finished.
    pub fn complete_load(&mut self, pos: TilePos, result: Result<Option<TileRecord>>) -> Option<TileSource> {
        self.lifecycle.complete_load(
            pos,
            result,
            &self.generator,
            self.sink.as_mut(),
            Utc::now().timestamp_millis(),
        )
    }

    pub fn height_at(&self, x: f64, z: f64) -> f64 {
        self.queries().height_at(x, z)
    }

    pub fn is_walkable(&self, x: f64, z: f64) -> Walkability {
        self.queries().is_walkable(x, z)
    }

    pub fn terrain_info_at(&self, x: f64, z: f64) -> TerrainInfo {
        self.queries().terrain_info_at(x, z)
    }

    pub fn mob_spawn_positions(&self, tile_x: i32, tile_z: i32, max: usize) -> Vec<SpawnPoint> {
        self.queries().mob_spawn_positions(tile_x, tile_z, max)
    }

    /// Flag gameplay changes on a resident tile. False if not resident.
    pub fn mark_dirty(&mut self, pos: TilePos, flags: DirtyFlags) -> bool {
        self.lifecycle.mark_dirty(pos, flags)
    }

    /// Harvest a resource node from a resident tile.
    pub fn remove_resource(&mut self, pos: TilePos, id: &str) -> Option<ResourceNode> {
        self.lifecycle.tile_mut(pos)?.remove_resource(id)
    }

    pub fn tile(&self, pos: TilePos) -> Option<&Tile> {
        self.lifecycle.tile(pos)
    }

    pub fn tile_state(&self, pos: TilePos) -> TileState {
        self.lifecycle.tile_state(pos)
    }

    pub fn resident_count(&self) -> usize {
        self.lifecycle.tiles().len()
    }

    pub fn lifecycle(&self) -> &ChunkLifecycleManager {
        &self.lifecycle
    }

    pub fn gate(&self) -> &SimulationGate {
        self.lifecycle.gate()
    }

    pub fn world_version(&self) -> u64 {
        self.scheduler.world_version()
    }

    /// Persistence pass due at `now`, if any.
    pub fn persistence_due(&self, now: Instant) -> Option<PassKind> {
        self.scheduler.due(now)
    }

    pub fn take_dirty_batch(&mut self, now: Instant) -> PersistBatch {
        self.scheduler
            .take_dirty_batch(self.lifecycle.tiles_mut(), now)
    }

    pub fn take_snapshot_batch(&mut self, now: Instant) -> PersistBatch {
        self.scheduler
            .take_snapshot_batch(self.lifecycle.tiles_mut(), now)
    }

    pub fn acknowledge(&mut self, report: &FlushReport) {
        self.scheduler
            .acknowledge(self.lifecycle.tiles_mut(), report);
    }

    /// Synchronous full snapshot into `store`.
    pub fn force_full_serialization(&mut self, store: &dyn TileStore) -> FlushReport {
        let batch = self.take_snapshot_batch(Instant::now());
        let report = PersistenceScheduler::write_batch(store, &batch);
        self.acknowledge(&report);
        report
    }

    /// Run whichever persistence pass is due, writing synchronously.
    pub fn poll_persistence(&mut self, now: Instant, store: &dyn TileStore) -> Option<FlushReport> {
        let batch = match self.persistence_due(now)? {
            PassKind::FullSnapshot => self.take_snapshot_batch(now),
            PassKind::DirtyFlush => self.take_dirty_batch(now),
        };
        let report = PersistenceScheduler::write_batch(store, &batch);
        self.acknowledge(&report);
        Some(report)
    }

    /// Bounding-box diagnostics over every resident tile.
    pub fn check_anomalies(&self) -> AnomalyReport {
        check_tiles(self.lifecycle.tiles().iter(), &self.config)
    }
}
