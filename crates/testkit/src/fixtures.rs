//! Scripted inputs and failing collaborators for worldtests.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tileworld_core::{PlayerId, PlayerPosition, TilePos};
use tileworld_world::{MemoryStore, TileRecord, TileStore};
use tracing::debug;

/// A fixed sequence of position-feed frames, one per lifecycle pass.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPlayers {
    frames: Vec<Vec<PlayerPosition>>,
}

impl ScriptedPlayers {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame with the given players.
    pub fn frame(mut self, players: impl IntoIterator<Item = PlayerPosition>) -> Self {
        self.frames.push(players.into_iter().collect());
        self
    }

    /// Append a frame with one player standing at the centre of `tile`.
    pub fn at_tile(self, id: u64, tile: TilePos, tile_size: f64) -> Self {
        let (x, z) = tile.center(tile_size);
        self.frame([PlayerPosition::new(PlayerId(id), x, z)])
    }

    /// A single player walking `steps` tiles along +x, starting at `start`.
    pub fn walk_x(id: u64, start: TilePos, steps: i32, tile_size: f64) -> Self {
        (0..=steps).fold(Self::new(), |script, step| {
            script.at_tile(id, TilePos::new(start.x + step, start.z), tile_size)
        })
    }

    /// Frames in order.
    pub fn frames(&self) -> impl Iterator<Item = &[PlayerPosition]> + '_ {
        self.frames.iter().map(Vec::as_slice)
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when the script has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A store that fails writes for chosen tiles or for the next N calls.
///
/// Successful writes land in an inner [`MemoryStore`].
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<BTreeSet<TilePos>>,
    fail_next: AtomicUsize,
    failures: AtomicUsize,
}

impl FlakyStore {
    /// Store that succeeds until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every save of `pos` until [`FlakyStore::heal`] is called.
    pub fn fail_tile(&self, pos: TilePos) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pos);
    }

    /// Fail the next `count` saves regardless of tile.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.fail_next.store(0, Ordering::SeqCst);
    }

    /// Number of injected failures so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Records that were written successfully.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn should_fail(&self, pos: TilePos) -> bool {
        let tile_fails = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pos);
        let budget_fails = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        tile_fails || budget_fails
    }
}

impl TileStore for FlakyStore {
    fn save_tile(&self, record: &TileRecord) -> Result<()> {
        let pos = record.position();
        if self.should_fail(pos) {
            let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(tile = %pos, failures, "Injecting write failure");
            bail!("injected write failure for tile {pos}");
        }
        self.inner.save_tile(record)
    }

    fn load_tile(&self, pos: TilePos) -> Result<Option<TileRecord>> {
        self.inner.load_tile(pos)
    }
}

static TEMP_DIRS: AtomicUsize = AtomicUsize::new(0);

/// Fresh, empty directory under the system temp dir for a save run.
pub fn temp_world_dir(label: &str) -> PathBuf {
    let serial = TEMP_DIRS.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let dir = std::env::temp_dir().join(format!(
        "tileworld-{label}-{}-{nanos}-{serial}",
        std::process::id()
    ));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).ok();
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_script_steps_one_tile_per_frame() {
        let script = ScriptedPlayers::walk_x(7, TilePos::new(-1, 2), 3, 100.0);
        assert_eq!(script.len(), 4);
        let last = script.frames().last().unwrap();
        assert_eq!(last[0].id, PlayerId(7));
        assert_eq!(TilePos::from_world(last[0].x, last[0].z, 100.0), TilePos::new(2, 2));
    }

    #[test]
    fn temp_dirs_are_distinct() {
        assert_ne!(temp_world_dir("a"), temp_world_dir("a"));
    }
}
