//! Tile records and the stores that hold them.
//!
//! On disk, tiles are grouped into `.rg` region files of 32x32 tiles. Each
//! region file uses zstd compression and CRC32 validation.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tileworld_core::TilePos;

use crate::biome::BiomeId;
use crate::tile::{ResourceNode, RoadSegment, Tile};

/// Magic number for region file identification ("TWRG" = tileworld region).
const REGION_MAGIC: u32 = 0x5457_5247;

const REGION_VERSION: u16 = 1;
/// Region edge in tiles.
const REGION_SIZE: i32 = 32;
/// Magic, version, crc32, payload length.
const HEADER_LEN: usize = 14;
const ZSTD_LEVEL: i32 = 3;

/// Persisted shape of one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub x: i32,
    pub z: i32,
    pub biome: BiomeId,
    pub heights: Vec<f64>,
    pub resources: Vec<ResourceNode>,
    pub roads: Vec<RoadSegment>,
    pub reference_count: u32,
    pub last_active_ms: i64,
    pub simulated: bool,
    /// World-state version of the snapshot (or flush) that wrote this record.
    pub world_version: u64,
    pub saved_at: DateTime<Utc>,
}

impl TileRecord {
    /// Capture the persisted state of a tile.
    pub fn from_tile(tile: &Tile, world_version: u64, saved_at: DateTime<Utc>) -> Self {
        let pos = tile.position();
        Self {
            x: pos.x,
            z: pos.z,
            biome: tile.biome(),
            heights: tile.heights().to_vec(),
            resources: tile.resources().to_vec(),
            roads: tile.roads().to_vec(),
            reference_count: tile.ref_count(),
            last_active_ms: tile.last_active_ms(),
            simulated: tile.is_simulated(),
            world_version,
            saved_at,
        }
    }

    /// Grid position of the record.
    pub fn position(&self) -> TilePos {
        TilePos::new(self.x, self.z)
    }
}

/// Durable storage collaborator.
///
/// Calls may come from a worker thread, so implementations are `Send + Sync`
/// and take `&self`.
pub trait TileStore: Send + Sync {
    /// Persist one record, replacing any previous record for the same tile.
    fn save_tile(&self, record: &TileRecord) -> Result<()>;

    /// Load the record of a tile, `Ok(None)` when it was never saved.
    fn load_tile(&self, pos: TilePos) -> Result<Option<TileRecord>>;
}

/// Fixed-size prefix of every region file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegionHeader {
    version: u16,
    crc32: u32,
    payload_len: u32,
}

impl RegionHeader {
    fn for_payload(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            version: REGION_VERSION,
            crc32: crc32fast::hash(payload),
            payload_len: u32::try_from(payload.len()).context("Region payload over 4 GiB")?,
        })
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&REGION_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.payload_len.to_le_bytes());
    }

    /// Split `bytes` into a validated header and the payload it describes.
    fn parse(bytes: &[u8]) -> Result<(Self, &[u8])> {
        if bytes.len() < HEADER_LEN {
            bail!("Region file truncated: {} bytes", bytes.len());
        }
        let (head, rest) = bytes.split_at(HEADER_LEN);
        let magic = u32::from_le_bytes(head[0..4].try_into()?);
        if magic != REGION_MAGIC {
            bail!("Not a region file: magic 0x{magic:08X}");
        }
        let header = Self {
            version: u16::from_le_bytes(head[4..6].try_into()?),
            crc32: u32::from_le_bytes(head[6..10].try_into()?),
            payload_len: u32::from_le_bytes(head[10..14].try_into()?),
        };
        if header.version > REGION_VERSION {
            bail!("Region format version {} is newer than {REGION_VERSION}", header.version);
        }
        let payload = rest
            .get(..header.payload_len as usize)
            .context("Region payload shorter than its header claims")?;
        Ok((header, payload))
    }
}

/// Region coordinates: which file a tile lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegionPos {
    x: i32,
    z: i32,
}

impl RegionPos {
    fn containing(tile: TilePos) -> Self {
        Self {
            x: tile.x.div_euclid(REGION_SIZE),
            z: tile.z.div_euclid(REGION_SIZE),
        }
    }

    fn file_name(self) -> String {
        format!("r.{}.{}.rg", self.x, self.z)
    }
}

/// Encoded tile records of one region, keyed by tile.
type RegionData = BTreeMap<TilePos, Vec<u8>>;

fn encode_region(data: &RegionData) -> Result<Vec<u8>> {
    let raw = bincode::serialize(data).context("Failed to serialize region")?;
    let payload = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL).context("Failed to compress region")?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    RegionHeader::for_payload(&payload)?.write_into(&mut bytes);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode_region(bytes: &[u8]) -> Result<RegionData> {
    let (header, payload) = RegionHeader::parse(bytes)?;
    let crc = crc32fast::hash(payload);
    if crc != header.crc32 {
        bail!(
            "Region checksum mismatch: header {:08X}, payload {crc:08X}",
            header.crc32
        );
    }
    let raw = zstd::decode_all(payload).context("Failed to decompress region")?;
    bincode::deserialize(&raw).context("Failed to deserialize region")
}

/// Tile records grouped into checksummed, compressed region files.
#[derive(Debug)]
pub struct RegionStore {
    world_dir: PathBuf,
    /// Serializes read-modify-write cycles on region files. Loads skip it:
    /// files are only ever replaced whole by rename.
    io_lock: Mutex<()>,
}

impl RegionStore {
    /// Store rooted at `world_dir`, created if missing.
    pub fn new<P: AsRef<Path>>(world_dir: P) -> Result<Self> {
        let world_dir = world_dir.as_ref().to_path_buf();
        fs::create_dir_all(&world_dir)
            .with_context(|| format!("Failed to create {}", world_dir.display()))?;
        Ok(Self {
            world_dir,
            io_lock: Mutex::new(()),
        })
    }

    fn region_path(&self, region: RegionPos) -> PathBuf {
        self.world_dir.join(region.file_name())
    }

    fn read_region(&self, region: RegionPos) -> Result<Option<RegionData>> {
        let path = self.region_path(region);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        decode_region(&bytes)
            .with_context(|| format!("Corrupt region file {}", path.display()))
            .map(Some)
    }

    /// Replace a region file. The bytes land beside the target first so a
    /// crash never leaves a torn file.
    fn replace_region(&self, region: RegionPos, data: &RegionData) -> Result<()> {
        let path = self.region_path(region);
        let staged = path.with_extension("rg.tmp");
        let bytes = encode_region(data)?;
        let mut file = File::create(&staged)
            .with_context(|| format!("Failed to create {}", staged.display()))?;
        file.write_all(&bytes).context("Failed to write region")?;
        file.sync_all().context("Failed to sync region")?;
        fs::rename(&staged, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))
    }
}

impl TileStore for RegionStore {
    fn save_tile(&self, record: &TileRecord) -> Result<()> {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let pos = record.position();
        let region = RegionPos::containing(pos);
        let mut data = self
            .read_region(region)
            .with_context(|| format!("Cannot update region of tile {pos}"))?
            .unwrap_or_default();
        data.insert(
            pos,
            bincode::serialize(record).context("Failed to serialize tile record")?,
        );
        self.replace_region(region, &data)
    }

    fn load_tile(&self, pos: TilePos) -> Result<Option<TileRecord>> {
        let Some(data) = self.read_region(RegionPos::containing(pos))? else {
            return Ok(None);
        };
        data.get(&pos)
            .map(|bytes| bincode::deserialize(bytes).context("Failed to deserialize tile record"))
            .transpose()
    }
}

/// In-memory store for tests and runs without a save directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<TilePos, TileRecord>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct tiles stored.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful `save_tile` calls, including overwrites.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    /// Copy of the stored record for `pos`.
    pub fn get(&self, pos: TilePos) -> Option<TileRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pos)
            .cloned()
    }
}

impl TileStore for MemoryStore {
    fn save_tile(&self, record: &TileRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.position(), record.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn load_tile(&self, pos: TilePos) -> Result<Option<TileRecord>> {
        Ok(self.get(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::ResourceKind;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(tag: &str) -> PathBuf {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        env::temp_dir().join(format!("tileworld_test_{}_{}", tag, timestamp))
    }

    fn record(x: i32, z: i32) -> TileRecord {
        TileRecord {
            x,
            z,
            biome: BiomeId::Forest,
            heights: vec![1.0, 2.5, 3.25, 4.0],
            resources: vec![ResourceNode {
                id: format!("{}_{}_tree_0", x, z),
                kind: ResourceKind::Tree,
                position: [x as f64 * 100.0 + 5.0, 2.0, z as f64 * 100.0 + 7.0],
            }],
            roads: vec![RoadSegment {
                start: [0.0, 50.0],
                end: [100.0, 50.0],
                width: 6.0,
            }],
            reference_count: 2,
            last_active_ms: 1_700_000_000_000,
            simulated: true,
            world_version: 4,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn header_describes_its_payload() {
        let mut data = RegionData::new();
        data.insert(TilePos::new(3, 4), vec![7; 40]);
        let bytes = encode_region(&data).unwrap();

        let (header, payload) = RegionHeader::parse(&bytes).unwrap();
        assert_eq!(&bytes[..4], b"GRWT");
        assert_eq!(header.version, REGION_VERSION);
        assert_eq!(header.payload_len as usize, bytes.len() - HEADER_LEN);
        assert_eq!(header.crc32, crc32fast::hash(payload));
        assert_eq!(decode_region(&bytes).unwrap(), data);
    }

    #[test]
    fn foreign_or_truncated_files_are_rejected() {
        let bytes = encode_region(&RegionData::new()).unwrap();
        let mut foreign = bytes.clone();
        foreign[0] ^= 0xFF;
        assert!(decode_region(&foreign).is_err());
        assert!(decode_region(&bytes[..4]).is_err());
        assert!(decode_region(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn regions_cover_32_tiles_per_axis() {
        let region = |x, z| RegionPos::containing(TilePos::new(x, z));
        assert_eq!(region(0, 0), RegionPos { x: 0, z: 0 });
        assert_eq!(region(31, 31), RegionPos { x: 0, z: 0 });
        assert_eq!(region(32, -1), RegionPos { x: 1, z: -1 });
        assert_eq!(region(-32, -33), RegionPos { x: -1, z: -2 });
        assert_eq!(region(-33, 64).file_name(), "r.-2.2.rg");
    }

    #[test]
    fn save_and_load_tile() {
        let dir = temp_dir("save");
        let store = RegionStore::new(&dir).unwrap();
        let original = record(5, -3);

        assert!(store.load_tile(original.position()).unwrap().is_none());
        store.save_tile(&original).expect("save");
        let loaded = store.load_tile(original.position()).expect("load");
        assert_eq!(loaded, Some(original));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn multiple_tiles_in_same_region() {
        let dir = temp_dir("multi");
        let store = RegionStore::new(&dir).unwrap();
        let first = record(0, 0);
        let second = record(15, 20);
        store.save_tile(&first).unwrap();
        store.save_tile(&second).unwrap();

        assert_eq!(store.load_tile(first.position()).unwrap(), Some(first));
        assert_eq!(store.load_tile(second.position()).unwrap(), Some(second));
        assert!(store.load_tile(TilePos::new(1, 1)).unwrap().is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn loads_do_not_wait_for_a_running_write() {
        let dir = temp_dir("lockfree");
        let store = RegionStore::new(&dir).unwrap();
        let original = record(4, 9);
        store.save_tile(&original).unwrap();

        let writer = store.io_lock.lock().unwrap();
        assert_eq!(store.load_tile(original.position()).unwrap(), Some(original));
        drop(writer);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupted_region_is_an_error() {
        let dir = temp_dir("corrupt");
        let store = RegionStore::new(&dir).unwrap();
        let original = record(2, 2);
        store.save_tile(&original).unwrap();

        let path = store.region_path(RegionPos { x: 0, z: 0 });
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(store.load_tile(original.position()).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        let first = record(1, 1);
        let second = TileRecord {
            world_version: 5,
            ..first.clone()
        };
        store.save_tile(&first).unwrap();
        store.save_tile(&second).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load_tile(TilePos::new(1, 1)).unwrap(), Some(second));
    }
}
