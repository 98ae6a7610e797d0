//! Storage workers.
//!
//! Batches are written in submission order on the blocking pool, so a slow
//! disk never stalls the simulation task. Reports flow back over a channel in
//! the same order. Tile reads also run on the blocking pool and stream their
//! results back one tile at a time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tileworld_core::{TilePos, WorldError};
use tileworld_world::{
    FailedWrite, FlushReport, PersistBatch, PersistenceScheduler, TileRecord, TileStore,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Bound on batches queued ahead of the writer.
const JOB_QUEUE: usize = 16;

/// Handle to the writer task.
pub struct PersistenceWorker {
    jobs: mpsc::Sender<PersistBatch>,
    task: JoinHandle<()>,
}

impl PersistenceWorker {
    /// Start a writer for `store`, reporting every finished batch to `reports`.
    pub fn spawn(store: Arc<dyn TileStore>, reports: mpsc::UnboundedSender<FlushReport>) -> Self {
        let (jobs, queue) = mpsc::channel(JOB_QUEUE);
        let task = tokio::spawn(run(store, queue, reports));
        Self { jobs, task }
    }

    /// Queue a batch. Hands the batch back when the writer has stopped.
    pub async fn submit(&self, batch: PersistBatch) -> Result<(), PersistBatch> {
        self.jobs.send(batch).await.map_err(|rejected| rejected.0)
    }

    /// Stop accepting batches and wait for every queued one to be written.
    pub async fn drain(self) -> Result<()> {
        drop(self.jobs);
        self.task
            .await
            .map_err(|err| anyhow!("persistence worker failed: {err}"))
    }

    #[cfg(test)]
    pub(crate) async fn kill(&self) {
        self.task.abort();
        while !self.jobs.is_closed() {
            tokio::task::yield_now().await;
        }
    }
}

async fn run(
    store: Arc<dyn TileStore>,
    mut queue: mpsc::Receiver<PersistBatch>,
    reports: mpsc::UnboundedSender<FlushReport>,
) {
    while let Some(batch) = queue.recv().await {
        let batch = Arc::new(batch);
        let writer_store = Arc::clone(&store);
        let writer_batch = Arc::clone(&batch);
        let report = match tokio::task::spawn_blocking(move || {
            PersistenceScheduler::write_batch(writer_store.as_ref(), &writer_batch)
        })
        .await
        {
            Ok(report) => report,
            Err(err) => {
                error!(batch = batch.id, error = %err, "Tile writer panicked, batch marked failed");
                failed_report(&batch, &err.to_string())
            }
        };
        debug!(batch = report.batch_id, saved = report.saved.len(), "Batch written");
        if reports.send(report).is_err() {
            debug!("Host gone, stopping persistence worker");
            break;
        }
    }
}

/// Result of one tile read.
pub struct LoadedTile {
    pub pos: TilePos,
    pub result: Result<Option<TileRecord>>,
}

/// Reads saved tiles off the simulation task.
pub struct TileLoader {
    store: Arc<dyn TileStore>,
    results: mpsc::UnboundedSender<LoadedTile>,
}

impl TileLoader {
    pub fn new(store: Arc<dyn TileStore>, results: mpsc::UnboundedSender<LoadedTile>) -> Self {
        Self { store, results }
    }

    /// Read `positions` on the blocking pool. Every position gets exactly one
    /// result, even when the store panics.
    pub fn request(&self, positions: Vec<TilePos>) {
        if positions.is_empty() {
            return;
        }
        let store = Arc::clone(&self.store);
        let results = self.results.clone();
        tokio::task::spawn_blocking(move || {
            for pos in positions {
                let result = panic::catch_unwind(AssertUnwindSafe(|| store.load_tile(pos)))
                    .unwrap_or_else(|_| Err(anyhow!("tile reader panicked")));
                if results.send(LoadedTile { pos, result }).is_err() {
                    debug!("Host gone, dropping remaining tile reads");
                    break;
                }
            }
        });
    }
}

/// Report marking every record of `batch` as failed.
pub(crate) fn failed_report(batch: &PersistBatch, reason: &str) -> FlushReport {
    FlushReport {
        batch_id: batch.id,
        kind: batch.kind,
        world_version: batch.world_version,
        saved: Vec::new(),
        failed: batch
            .records
            .iter()
            .map(|record| FailedWrite {
                record: record.clone(),
                error: WorldError::Storage {
                    tile: record.position(),
                    reason: reason.to_string(),
                },
            })
            .collect(),
    }
}
