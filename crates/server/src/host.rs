//! World host actor.
//!
//! One tokio task owns the [`TileWorld`] and is the only place it is mutated.
//! Four independent timers drive lifecycle passes, dirty flushes, full
//! snapshots and bounds checks; a mailbox carries requests from
//! [`HostHandle`]s. Tile writes run on the [`PersistenceWorker`] and tile
//! reads on a [`TileLoader`], so storage never blocks the host.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tileworld_core::TilePos;
use tileworld_world::{
    DirtyFlags, FlushReport, PersistBatch, PersistenceScheduler, SpawnPoint, TerrainInfo,
    TerrainQueries, TileStore, TileWorld, Walkability,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, info, instrument, warn};

use crate::feed::PositionFeed;
use crate::schedule::{ScheduleConfig, TimerKind};
use crate::worker::{failed_report, LoadedTile, PersistenceWorker, TileLoader};

/// Bound on requests queued ahead of the host.
const MAILBOX: usize = 64;

/// Point-in-time view of the host, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    /// Lifecycle passes run so far.
    pub tick: u64,
    /// Resident tiles.
    pub resident: usize,
    /// Resident tiles inside some core range.
    pub simulated: usize,
    /// Current world-state version.
    pub world_version: u64,
    /// Timers still armed.
    pub active_timers: Vec<TimerKind>,
    /// Batches handed to the worker and not yet acknowledged.
    pub writes_in_flight: usize,
    /// Tile reads requested and not yet delivered.
    pub loads_in_flight: usize,
    /// Anomalies found by the most recent bounds check.
    pub last_anomalies: usize,
}

enum HostMsg {
    MarkDirty {
        tile: TilePos,
        flags: DirtyFlags,
        respond_to: oneshot::Sender<bool>,
    },
    CancelTimer {
        kind: TimerKind,
        respond_to: oneshot::Sender<bool>,
    },
    ForceSnapshot {
        respond_to: oneshot::Sender<Result<FlushReport>>,
    },
    Status {
        respond_to: oneshot::Sender<HostStatus>,
    },
    Shutdown {
        respond_to: oneshot::Sender<Result<FlushReport>>,
    },
}

/// Clonable handle to a running host.
///
/// Terrain queries are answered on the caller's task from the shared,
/// immutable sampler; everything that touches tile state goes through the
/// host's mailbox.
#[derive(Clone)]
pub struct HostHandle {
    mailbox: mpsc::Sender<HostMsg>,
    queries: TerrainQueries,
}

impl HostHandle {
    /// Terrain height in metres.
    pub fn height_at(&self, x: f64, z: f64) -> f64 {
        self.queries.height_at(x, z)
    }

    /// Walkability of a world point.
    pub fn is_walkable(&self, x: f64, z: f64) -> Walkability {
        self.queries.is_walkable(x, z)
    }

    /// Height, biome, slope and walkability of a world point.
    pub fn terrain_info_at(&self, x: f64, z: f64) -> TerrainInfo {
        self.queries.terrain_info_at(x, z)
    }

    /// Deterministic mob spawn candidates for a tile.
    pub fn mob_spawn_positions(&self, tile_x: i32, tile_z: i32, max: usize) -> Vec<SpawnPoint> {
        self.queries.mob_spawn_positions(tile_x, tile_z, max)
    }

    /// Flag gameplay changes on a resident tile. False if it is not resident.
    pub async fn mark_dirty(&self, tile: TilePos, flags: DirtyFlags) -> Result<bool> {
        self.request(|respond_to| HostMsg::MarkDirty {
            tile,
            flags,
            respond_to,
        })
        .await
    }

    /// Disarm one timer. False if it was already disarmed.
    pub async fn cancel_timer(&self, kind: TimerKind) -> Result<bool> {
        self.request(|respond_to| HostMsg::CancelTimer { kind, respond_to })
            .await
    }

    /// Write every resident tile and the eviction outbox now, and wait until
    /// the writes have landed.
    pub async fn force_full_serialization(&self) -> Result<FlushReport> {
        self.request(|respond_to| HostMsg::ForceSnapshot { respond_to })
            .await?
    }

    /// Current host status.
    pub async fn status(&self) -> Result<HostStatus> {
        self.request(|respond_to| HostMsg::Status { respond_to })
            .await
    }

    /// Stop all timers, write a final full snapshot and stop the host.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        self.request(|respond_to| HostMsg::Shutdown { respond_to })
            .await?
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HostMsg) -> Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.mailbox
            .send(make(respond_to))
            .await
            .map_err(|_| anyhow!("world host has stopped"))?;
        response.await.context("world host dropped the request")
    }
}

#[derive(Default)]
struct Timers {
    lifecycle: Option<Interval>,
    dirty_flush: Option<Interval>,
    snapshot: Option<Interval>,
    bounds_check: Option<Interval>,
}

impl Timers {
    fn arm(schedule: &ScheduleConfig, start: Instant) -> Self {
        Self {
            lifecycle: schedule.interval(TimerKind::Lifecycle, start),
            dirty_flush: schedule.interval(TimerKind::DirtyFlush, start),
            snapshot: schedule.interval(TimerKind::Snapshot, start),
            bounds_check: schedule.interval(TimerKind::BoundsCheck, start),
        }
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<Interval> {
        match kind {
            TimerKind::Lifecycle => &mut self.lifecycle,
            TimerKind::DirtyFlush => &mut self.dirty_flush,
            TimerKind::Snapshot => &mut self.snapshot,
            TimerKind::BoundsCheck => &mut self.bounds_check,
        }
    }

    fn cancel(&mut self, kind: TimerKind) -> bool {
        self.slot(kind).take().is_some()
    }

    fn cancel_all(&mut self) {
        for kind in TimerKind::ALL {
            self.cancel(kind);
        }
    }

    fn active(&mut self) -> Vec<TimerKind> {
        TimerKind::ALL
            .into_iter()
            .filter(|&kind| self.slot(kind).is_some())
            .collect()
    }
}

/// Wait for the next tick of an armed timer; never resolves when disarmed.
async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

/// The simulation task.
pub struct WorldHost {
    world: TileWorld,
    feed: Arc<dyn PositionFeed>,
    store: Arc<dyn TileStore>,
    worker: PersistenceWorker,
    reports: mpsc::UnboundedReceiver<FlushReport>,
    loader: TileLoader,
    loads: mpsc::UnboundedReceiver<LoadedTile>,
    mailbox: mpsc::Receiver<HostMsg>,
    writes_in_flight: usize,
    last_anomalies: usize,
}

impl WorldHost {
    /// Start the host on the current tokio runtime.
    ///
    /// `store` receives every write and serves every read of a tile that is
    /// neither resident nor cached. The host reads it itself, so the world
    /// needs no store of its own.
    pub fn spawn(
        world: TileWorld,
        feed: Arc<dyn PositionFeed>,
        store: Arc<dyn TileStore>,
        schedule: ScheduleConfig,
    ) -> (HostHandle, JoinHandle<Result<()>>) {
        let (handle, host) = Self::new(world, feed, store);
        let task = tokio::spawn(host.run(schedule));
        (handle, task)
    }

    fn new(
        world: TileWorld,
        feed: Arc<dyn PositionFeed>,
        store: Arc<dyn TileStore>,
    ) -> (HostHandle, Self) {
        let (mailbox_tx, mailbox) = mpsc::channel(MAILBOX);
        let (report_tx, reports) = mpsc::unbounded_channel();
        let (load_tx, loads) = mpsc::unbounded_channel();
        let handle = HostHandle {
            mailbox: mailbox_tx,
            queries: world.queries().clone(),
        };
        let host = WorldHost {
            world,
            feed,
            worker: PersistenceWorker::spawn(Arc::clone(&store), report_tx),
            reports,
            loader: TileLoader::new(Arc::clone(&store), load_tx),
            loads,
            store,
            mailbox,
            writes_in_flight: 0,
            last_anomalies: 0,
        };
        (handle, host)
    }

    async fn run(mut self, schedule: ScheduleConfig) -> Result<()> {
        let mut timers = Timers::arm(&schedule, Instant::now());
        info!(timers = ?timers.active(), "World host started");

        loop {
            tokio::select! {
                msg = self.mailbox.recv() => {
                    let Some(msg) = msg else {
                        info!("All host handles dropped, shutting down");
                        timers.cancel_all();
                        self.final_snapshot().await?;
                        break;
                    };
                    if let Some(respond_to) = self.handle(msg, &mut timers).await {
                        timers.cancel_all();
                        let report = self.final_snapshot().await;
                        let outcome = report.as_ref().map(|_| ()).map_err(|err| anyhow!("{err:#}"));
                        let _ = respond_to.send(report);
                        outcome?;
                        break;
                    }
                }
                Some(report) = self.reports.recv() => self.acknowledge(&report),
                Some(loaded) = self.loads.recv() => self.finish_load(loaded),
                _ = next_tick(&mut timers.lifecycle) => self.lifecycle_pass(),
                _ = next_tick(&mut timers.dirty_flush) => {
                    if let Err(err) = self.dirty_flush().await {
                        warn!(error = %format!("{err:#}"), "Dirty flush not submitted, tiles stay dirty");
                    }
                }
                _ = next_tick(&mut timers.snapshot) => {
                    if let Err(err) = self.scheduled_snapshot().await {
                        warn!(error = %format!("{err:#}"), "Snapshot not submitted, tiles stay queued");
                    }
                }
                _ = next_tick(&mut timers.bounds_check) => self.bounds_check(),
            }
        }

        info!(version = self.world.world_version(), "World host stopped");
        self.worker.drain().await
    }

    /// Handle one request. Returns the responder when the request was a
    /// shutdown, which the run loop completes after stopping.
    async fn handle(
        &mut self,
        msg: HostMsg,
        timers: &mut Timers,
    ) -> Option<oneshot::Sender<Result<FlushReport>>> {
        match msg {
            HostMsg::MarkDirty {
                tile,
                flags,
                respond_to,
            } => {
                let _ = respond_to.send(self.world.mark_dirty(tile, flags));
            }
            HostMsg::CancelTimer { kind, respond_to } => {
                let cancelled = timers.cancel(kind);
                info!(timer = %kind, cancelled, "Timer cancelled");
                let _ = respond_to.send(cancelled);
            }
            HostMsg::ForceSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot_and_wait().await);
            }
            HostMsg::Status { respond_to } => {
                let _ = respond_to.send(HostStatus {
                    tick: self.world.lifecycle().tick().0,
                    resident: self.world.resident_count(),
                    simulated: self.world.gate().simulated_len(),
                    world_version: self.world.world_version(),
                    active_timers: timers.active(),
                    writes_in_flight: self.writes_in_flight,
                    loads_in_flight: self.world.lifecycle().loading_len(),
                    last_anomalies: self.last_anomalies,
                });
            }
            HostMsg::Shutdown { respond_to } => return Some(respond_to),
        }
        None
    }

    fn lifecycle_pass(&mut self) {
        let players = self.feed.snapshot();
        let mut report = self.world.run_lifecycle_pass_deferred(&players);
        self.loader.request(std::mem::take(&mut report.load_requests));
        if report.generated + report.restored + report.evicted > 0 {
            debug!(
                tick = report.tick,
                resident = report.resident,
                evicted = report.evicted,
                "Residency changed"
            );
        }
    }

    fn finish_load(&mut self, loaded: LoadedTile) {
        if let Some(source) = self.world.complete_load(loaded.pos, loaded.result) {
            debug!(tile = %loaded.pos, ?source, "Tile resident");
        }
    }

    #[instrument(skip(self))]
    async fn dirty_flush(&mut self) -> Result<()> {
        let batch = self.world.take_dirty_batch(Instant::now().into_std());
        if batch.is_empty() {
            return Ok(());
        }
        self.submit(batch).await
    }

    #[instrument(skip(self))]
    async fn scheduled_snapshot(&mut self) -> Result<()> {
        let batch = self.world.take_snapshot_batch(Instant::now().into_std());
        self.submit(batch).await
    }

    fn bounds_check(&mut self) {
        self.last_anomalies = self.world.check_anomalies().anomalies.len();
    }

    /// Hand a batch to the worker. A rejected batch is acknowledged as failed
    /// so its tiles stay dirty.
    async fn submit(&mut self, batch: PersistBatch) -> Result<()> {
        match self.worker.submit(batch).await {
            Ok(()) => {
                self.writes_in_flight += 1;
                Ok(())
            }
            Err(batch) => {
                self.world
                    .acknowledge(&failed_report(&batch, "persistence worker stopped"));
                Err(anyhow!("persistence worker stopped, batch {} requeued", batch.id))
            }
        }
    }

    fn acknowledge(&mut self, report: &FlushReport) {
        self.writes_in_flight = self.writes_in_flight.saturating_sub(1);
        if !report.is_clean() {
            warn!(
                batch = report.batch_id,
                failed = report.failed.len(),
                "Writes failed, tiles stay dirty for the next pass"
            );
        }
        self.world.acknowledge(report);
    }

    /// Full snapshot through the worker, acknowledging every earlier report
    /// first so acknowledgements keep submission order. Writes directly on the
    /// blocking pool when the worker is gone.
    async fn snapshot_and_wait(&mut self) -> Result<FlushReport> {
        let batch = self.world.take_snapshot_batch(Instant::now().into_std());
        let id = batch.id;
        let batch = match self.worker.submit(batch).await {
            Ok(()) => {
                self.writes_in_flight += 1;
                while let Some(report) = self.reports.recv().await {
                    self.acknowledge(&report);
                    if report.batch_id == id {
                        return Ok(report);
                    }
                }
                return Err(anyhow!("persistence worker stopped before snapshot {id} landed"));
            }
            Err(batch) => batch,
        };

        warn!(batch = id, "Persistence worker stopped, writing snapshot directly");
        let store = Arc::clone(&self.store);
        let report = tokio::task::spawn_blocking(move || {
            PersistenceScheduler::write_batch(store.as_ref(), &batch)
        })
        .await
        .context("Direct snapshot write panicked")?;
        self.world.acknowledge(&report);
        Ok(report)
    }

    async fn final_snapshot(&mut self) -> Result<FlushReport> {
        let report = self.snapshot_and_wait().await?;
        info!(
            version = report.world_version,
            saved = report.saved.len(),
            failed = report.failed.len(),
            "Final snapshot written"
        );
        Ok(report)
    }
}
