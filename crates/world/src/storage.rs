use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use tileworld_core::TilePos;

use crate::persist::TileRecord;
use crate::tile::{DirtyFlags, Tile};

/// Unsaved state of an evicted tile waiting for the next persistence pass.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub record: TileRecord,
    /// Dirty flags the tile carried when it was evicted.
    pub flags: DirtyFlags,
    /// Batch currently writing this record, if any.
    pub in_flight: Option<u64>,
}

/// In-memory tile arena.
///
/// Resident tiles live in a BTreeMap for deterministic iteration order.
/// Evicted tiles go one of two ways: clean tiles land in an LRU archive for
/// fast re-entry, dirty tiles are queued as records in the outbox until a
/// persistence pass writes them.
pub struct ResidentTiles {
    tiles: BTreeMap<TilePos, Tile>,
    archive: LruCache<TilePos, Tile>,
    outbox: BTreeMap<TilePos, PendingRecord>,
}

impl ResidentTiles {
    /// Create an arena whose archive keeps at most `archive_capacity` tiles.
    pub fn new(archive_capacity: usize) -> Self {
        let cap = NonZeroUsize::new(archive_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            tiles: BTreeMap::new(),
            archive: LruCache::new(cap),
            outbox: BTreeMap::new(),
        }
    }

    /// Number of resident tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Returns true when no tiles are currently resident.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, pos: TilePos) -> bool {
        self.tiles.contains_key(&pos)
    }

    /// Resident tile at `pos`, creating it with `make` if absent.
    ///
    /// Returns the tile and whether it was created. An already resident tile
    /// is returned untouched; `make` is not called.
    pub fn ensure_with(&mut self, pos: TilePos, make: impl FnOnce() -> Tile) -> (&mut Tile, bool) {
        match self.tiles.entry(pos) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(make()), true),
        }
    }

    /// Attempt to fetch a tile immutably.
    pub fn get(&self, pos: TilePos) -> Option<&Tile> {
        self.tiles.get(&pos)
    }

    /// Fetch a tile mutably (without creating it).
    pub fn get_mut(&mut self, pos: TilePos) -> Option<&mut Tile> {
        self.tiles.get_mut(&pos)
    }

    pub(crate) fn remove(&mut self, pos: TilePos) -> Option<Tile> {
        self.tiles.remove(&pos)
    }

    /// Iterate over resident tiles in position order.
    pub fn iter(&self) -> impl Iterator<Item = &Tile> + '_ {
        self.tiles.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tile> + '_ {
        self.tiles.values_mut()
    }

    /// Iterate over currently resident tile positions.
    pub fn positions(&self) -> impl Iterator<Item = TilePos> + '_ {
        self.tiles.keys().copied()
    }

    /// Park a clean evicted tile.
    pub(crate) fn archive(&mut self, tile: Tile) {
        self.archive.put(tile.position(), tile);
    }

    pub(crate) fn take_archived(&mut self, pos: TilePos) -> Option<Tile> {
        self.archive.pop(&pos)
    }

    /// Number of archived tiles.
    pub fn archived_len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_archived(&self, pos: TilePos) -> bool {
        self.archive.contains(&pos)
    }

    /// Queue the unsaved state of an evicted tile.
    pub(crate) fn queue(&mut self, pending: PendingRecord) {
        self.outbox.insert(pending.record.position(), pending);
    }

    pub(crate) fn take_pending(&mut self, pos: TilePos) -> Option<PendingRecord> {
        self.outbox.remove(&pos)
    }

    pub(crate) fn pending_mut(&mut self) -> impl Iterator<Item = &mut PendingRecord> + '_ {
        self.outbox.values_mut()
    }

    pub(crate) fn pending_entry(&mut self, pos: TilePos) -> Option<&mut PendingRecord> {
        self.outbox.get_mut(&pos)
    }

    /// Drop an outbox entry once the batch that carried it has landed.
    pub(crate) fn settle_pending(&mut self, pos: TilePos, batch_id: u64) -> bool {
        let landed = self
            .outbox
            .get(&pos)
            .is_some_and(|pending| pending.in_flight == Some(batch_id));
        if landed {
            self.outbox.remove(&pos);
        }
        landed
    }

    /// Number of evicted tiles whose state is still unsaved.
    pub fn pending_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_pending(&self, pos: TilePos) -> bool {
        self.outbox.contains_key(&pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biome::BiomeId;
    use chrono::Utc;

    fn tile(x: i32, z: i32) -> Tile {
        Tile::new(TilePos::new(x, z), BiomeId::Plains, 4, 100.0)
    }

    fn pending(x: i32, z: i32) -> PendingRecord {
        PendingRecord {
            record: TileRecord::from_tile(&tile(x, z), 0, Utc::now()),
            flags: DirtyFlags::RESOURCES,
            in_flight: None,
        }
    }

    #[test]
    fn ensure_with_is_idempotent() {
        let mut tiles = ResidentTiles::new(4);
        let pos = TilePos::new(1, 1);
        let (first, created) = tiles.ensure_with(pos, || tile(1, 1));
        assert!(created);
        first.mark_dirty(DirtyFlags::STATE);

        let (second, created) = tiles.ensure_with(pos, || panic!("must not regenerate"));
        assert!(!created);
        assert!(second.needs_save());
        assert_eq!(tiles.len(), 1);
    }

    #[test]
    fn archive_evicts_least_recent() {
        let mut tiles = ResidentTiles::new(2);
        tiles.archive(tile(0, 0));
        tiles.archive(tile(1, 0));
        tiles.archive(tile(2, 0));
        assert_eq!(tiles.archived_len(), 2);
        assert!(!tiles.is_archived(TilePos::new(0, 0)));
        assert!(tiles.take_archived(TilePos::new(2, 0)).is_some());
        assert!(!tiles.is_archived(TilePos::new(2, 0)));
    }

    #[test]
    fn positions_are_deterministic() {
        let mut tiles = ResidentTiles::new(1);
        for (x, z) in [(5, 5), (1, 2), (3, 0), (0, 0), (2, 1)] {
            tiles.ensure_with(TilePos::new(x, z), || tile(x, z));
        }
        let order: Vec<_> = tiles.positions().collect();
        let expected = vec![
            TilePos::new(0, 0),
            TilePos::new(1, 2),
            TilePos::new(2, 1),
            TilePos::new(3, 0),
            TilePos::new(5, 5),
        ];
        assert_eq!(order, expected);
    }

    #[test]
    fn pending_settles_only_for_matching_batch() {
        let mut tiles = ResidentTiles::new(1);
        tiles.queue(pending(3, 3));
        let pos = TilePos::new(3, 3);
        assert!(!tiles.settle_pending(pos, 7));
        assert_eq!(tiles.pending_len(), 1);
        if let Some(entry) = tiles.pending_entry(pos) {
            entry.in_flight = Some(7);
        }
        assert!(!tiles.settle_pending(pos, 8));
        assert!(tiles.settle_pending(pos, 7));
        assert!(!tiles.is_pending(pos));
        assert_eq!(tiles.pending_len(), 0);
    }

    #[test]
    fn get_returns_none_for_missing_tile() {
        let mut tiles = ResidentTiles::new(2);
        assert!(tiles.get(TilePos::new(999, 999)).is_none());
        assert!(tiles.get_mut(TilePos::new(999, 999)).is_none());
    }
}
