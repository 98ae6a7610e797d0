//! Time-boxed persistence of tile state.
//!
//! Two cadences run on wall-clock time, never on ticks: a light pass that
//! flushes dirty tiles and a full snapshot of every resident tile stamped with a
//! new world-state version. Batches are plain data so they can be written on
//! another thread and acknowledged back on the simulation side.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tileworld_core::{TilePos, WorldError};
use tracing::{info, warn};

use crate::persist::{TileRecord, TileStore};
use crate::storage::{PendingRecord, ResidentTiles};
use crate::tile::DirtyFlags;

/// Default interval between dirty flushes.
pub const DEFAULT_DIRTY_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between full snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Kind of persistence pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    DirtyFlush,
    FullSnapshot,
}

/// Records to write, captured on the simulation side.
#[derive(Debug, Clone)]
pub struct PersistBatch {
    pub id: u64,
    pub kind: PassKind,
    pub world_version: u64,
    pub records: Vec<TileRecord>,
}

impl PersistBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One record the store rejected.
#[derive(Debug, Clone)]
pub struct FailedWrite {
    pub record: TileRecord,
    pub error: WorldError,
}

/// Outcome of writing a batch.
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub batch_id: u64,
    pub kind: PassKind,
    pub world_version: u64,
    pub saved: Vec<TilePos>,
    pub failed: Vec<FailedWrite>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Decides when to persist and builds the batches.
#[derive(Debug, Clone)]
pub struct PersistenceScheduler {
    dirty_interval: Duration,
    snapshot_interval: Duration,
    last_dirty: Instant,
    last_snapshot: Instant,
    world_version: u64,
    next_batch: u64,
}

impl PersistenceScheduler {
    /// Scheduler whose clocks start at `now`.
    pub fn new(dirty_interval: Duration, snapshot_interval: Duration, now: Instant) -> Self {
        Self {
            dirty_interval,
            snapshot_interval,
            last_dirty: now,
            last_snapshot: now,
            world_version: 0,
            next_batch: 1,
        }
    }

    /// Version stamped on the most recent full snapshot (0 before the first).
    pub fn world_version(&self) -> u64 {
        self.world_version
    }

    /// Pass due at `now`, if any. A due snapshot wins over a due flush since
    /// it covers the dirty tiles as well.
    pub fn due(&self, now: Instant) -> Option<PassKind> {
        if now.saturating_duration_since(self.last_snapshot) >= self.snapshot_interval {
            Some(PassKind::FullSnapshot)
        } else if now.saturating_duration_since(self.last_dirty) >= self.dirty_interval {
            Some(PassKind::DirtyFlush)
        } else {
            None
        }
    }

    /// Take every dirty resident tile plus the eviction outbox.
    ///
    /// Dirty flags are cleared; a failed write restores them in
    /// [`PersistenceScheduler::acknowledge`].
    pub fn take_dirty_batch(&mut self, tiles: &mut ResidentTiles, now: Instant) -> PersistBatch {
        self.last_dirty = now;
        let id = self.allocate_batch();
        let saved_at = Utc::now();
        let version = self.world_version;

        let mut records: Vec<TileRecord> = tiles
            .iter_mut()
            .filter(|tile| tile.needs_save())
            .map(|tile| {
                tile.take_dirty_flags();
                TileRecord::from_tile(tile, version, saved_at)
            })
            .collect();
        records.extend(Self::drain_outbox(tiles, id, version, saved_at));

        PersistBatch {
            id,
            kind: PassKind::DirtyFlush,
            world_version: version,
            records,
        }
    }

    /// Take every resident tile, dirty or not, plus the eviction outbox, under a
    /// world-state version one higher than the last.
    pub fn take_snapshot_batch(&mut self, tiles: &mut ResidentTiles, now: Instant) -> PersistBatch {
        self.last_snapshot = now;
        self.world_version += 1;
        let id = self.allocate_batch();
        let saved_at = Utc::now();
        let version = self.world_version;

        let mut records: Vec<TileRecord> = tiles
            .iter_mut()
            .map(|tile| {
                tile.take_dirty_flags();
                TileRecord::from_tile(tile, version, saved_at)
            })
            .collect();
        records.extend(Self::drain_outbox(tiles, id, version, saved_at));

        PersistBatch {
            id,
            kind: PassKind::FullSnapshot,
            world_version: version,
            records,
        }
    }

    fn drain_outbox(
        tiles: &mut ResidentTiles,
        batch_id: u64,
        version: u64,
        saved_at: chrono::DateTime<Utc>,
    ) -> Vec<TileRecord> {
        tiles
            .pending_mut()
            .map(|pending| {
                pending.in_flight = Some(batch_id);
                TileRecord {
                    world_version: version,
                    saved_at,
                    ..pending.record.clone()
                }
            })
            .collect()
    }

    fn allocate_batch(&mut self) -> u64 {
        let id = self.next_batch;
        self.next_batch += 1;
        id
    }

    /// Write a batch, isolating per-record failures.
    ///
    /// Runs anywhere; touches nothing but the store.
    pub fn write_batch(store: &dyn TileStore, batch: &PersistBatch) -> FlushReport {
        let mut saved = Vec::with_capacity(batch.records.len());
        let mut failed = Vec::new();
        for record in &batch.records {
            let tile = record.position();
            match store.save_tile(record) {
                Ok(()) => saved.push(tile),
                Err(err) => {
                    let error = WorldError::Storage {
                        tile,
                        reason: format!("{err:#}"),
                    };
                    warn!(%tile, %error, "Tile write failed");
                    failed.push(FailedWrite {
                        record: record.clone(),
                        error,
                    });
                }
            }
        }
        info!(
            kind = ?batch.kind,
            version = batch.world_version,
            saved = saved.len(),
            failed = failed.len(),
            "Persistence pass complete"
        );
        FlushReport {
            batch_id: batch.id,
            kind: batch.kind,
            world_version: batch.world_version,
            saved,
            failed,
        }
    }

    /// Fold a write report back into tile state.
    ///
    /// Landed outbox entries are dropped. Failed records become dirty again:
    /// resident tiles get their flags back, evicted ones return to the outbox.
    pub fn acknowledge(&self, tiles: &mut ResidentTiles, report: &FlushReport) {
        for &pos in &report.saved {
            tiles.settle_pending(pos, report.batch_id);
        }
        for failure in &report.failed {
            let pos = failure.record.position();
            if let Some(tile) = tiles.get_mut(pos) {
                tile.mark_dirty(DirtyFlags::all());
            } else if let Some(pending) = tiles.pending_entry(pos) {
                pending.in_flight = None;
            } else {
                tiles.take_archived(pos);
                tiles.queue(PendingRecord {
                    record: failure.record.clone(),
                    flags: DirtyFlags::all(),
                    in_flight: None,
                });
            }
        }
    }
}
