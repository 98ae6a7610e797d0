//! Biome table and tile classifier.
//!
//! Assigns biomes from starter-town proximity, distance from the origin and a
//! dedicated zoning noise field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tileworld_core::{TilePos, WorldError};
use tracing::warn;

use crate::config::{StarterTown, WorldConfig, ZoningRules};
use crate::noise::{NoiseConfig, NoiseField};
use crate::tile::ResourceKind;

/// Biome identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BiomeId {
    /// Starter-town override; never hostile.
    SafeTown,
    Plains,
    /// Lush inner-zone biome.
    Meadow,
    Forest,
    Wasteland,
    /// Water biome: never walkable.
    Lake,
    Mountains,
    Badlands,
    FrozenWastes,
}

impl BiomeId {
    /// Get all biome IDs (for iteration).
    pub fn all() -> &'static [BiomeId] {
        &[
            BiomeId::SafeTown,
            BiomeId::Plains,
            BiomeId::Meadow,
            BiomeId::Forest,
            BiomeId::Wasteland,
            BiomeId::Lake,
            BiomeId::Mountains,
            BiomeId::Badlands,
            BiomeId::FrozenWastes,
        ]
    }

    /// Canonical string key used in configs and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            BiomeId::SafeTown => "safe_town",
            BiomeId::Plains => "plains",
            BiomeId::Meadow => "meadow",
            BiomeId::Forest => "forest",
            BiomeId::Wasteland => "wasteland",
            BiomeId::Lake => "lake",
            BiomeId::Mountains => "mountains",
            BiomeId::Badlands => "badlands",
            BiomeId::FrozenWastes => "frozen_wastes",
        }
    }

    /// Parse a canonical key.
    pub fn parse(input: &str) -> Option<Self> {
        Self::all().iter().copied().find(|id| id.as_str() == input)
    }
}

impl fmt::Display for BiomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static, immutable biome table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomeDefinition {
    pub id: BiomeId,
    /// Display name.
    pub name: String,
    /// Base vertex colour (R, G, B).
    pub color: [u8; 3],
    /// Lower end of the height range, as a fraction of the vertical scale.
    pub height_min: f64,
    /// Upper end of the height range, as a fraction of the vertical scale.
    pub height_max: f64,
    /// Amplitude multiplier applied to the normalized height noise.
    pub terrain_multiplier: f64,
    /// Water level, as a fraction of the vertical scale.
    pub water_level: f64,
    /// Maximum walkable slope (rise over run).
    pub max_slope: f64,
    /// Whether the biome is a body of water.
    #[serde(default)]
    pub is_water: bool,
    /// Mob type ids eligible to spawn here.
    #[serde(default)]
    pub mobs: Vec<String>,
    /// Difficulty tier (0 = safe).
    pub difficulty: u8,
    /// Resource types placed during generation.
    #[serde(default)]
    pub resources: Vec<ResourceKind>,
}

impl BiomeDefinition {
    /// Built-in plains entry used whenever a lookup misses.
    pub fn fallback() -> Self {
        Self {
            id: BiomeId::Plains,
            name: "Plains".into(),
            color: [124, 186, 86],
            height_min: 0.02,
            height_max: 0.25,
            terrain_multiplier: 0.8,
            water_level: 0.0,
            max_slope: 1.0,
            is_water: false,
            mobs: strings(&["rabbit", "boar"]),
            difficulty: 1,
            resources: vec![
                ResourceKind::Tree,
                ResourceKind::Rock,
                ResourceKind::Herb,
                ResourceKind::Gem,
            ],
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Default biome table.
pub fn default_biomes() -> Vec<BiomeDefinition> {
    use ResourceKind::*;

    let entry = |id: BiomeId,
                 name: &str,
                 color: [u8; 3],
                 range: (f64, f64),
                 terrain_multiplier: f64,
                 max_slope: f64,
                 mobs: &[&str],
                 difficulty: u8,
                 resources: Vec<ResourceKind>| BiomeDefinition {
        id,
        name: name.into(),
        color,
        height_min: range.0,
        height_max: range.1,
        terrain_multiplier,
        water_level: 0.0,
        max_slope,
        is_water: false,
        mobs: strings(mobs),
        difficulty,
        resources,
    };

    let mut town = entry(
        BiomeId::SafeTown,
        "Starter Town",
        [196, 180, 140],
        (0.05, 0.15),
        0.3,
        1.2,
        &[],
        0,
        vec![Tree, Herb],
    );
    // Towns sit above any water level.
    town.water_level = -1.0;

    let mut lake = entry(
        BiomeId::Lake,
        "Lake",
        [64, 120, 200],
        (-0.3, 0.15),
        1.0,
        1.0,
        &["mudcrab"],
        1,
        vec![Fish, Gem],
    );
    lake.is_water = true;

    vec![
        town,
        BiomeDefinition::fallback(),
        entry(
            BiomeId::Meadow,
            "Meadow",
            [110, 200, 90],
            (0.05, 0.3),
            0.7,
            1.0,
            &["rabbit", "deer"],
            1,
            vec![Tree, Herb, Gem],
        ),
        entry(
            BiomeId::Forest,
            "Forest",
            [46, 120, 52],
            (0.05, 0.4),
            1.0,
            0.9,
            &["wolf", "boar", "spider"],
            2,
            vec![Tree, Rock, Herb, Gem],
        ),
        entry(
            BiomeId::Wasteland,
            "Wasteland",
            [150, 130, 96],
            (0.0, 0.35),
            1.1,
            0.9,
            &["scavenger", "vulture"],
            3,
            vec![Rock, Ore, Gem],
        ),
        lake,
        entry(
            BiomeId::Mountains,
            "Mountains",
            [128, 128, 128],
            (0.3, 1.0),
            1.4,
            1.3,
            &["troll", "eagle"],
            4,
            vec![Rock, Ore, Gem],
        ),
        entry(
            BiomeId::Badlands,
            "Badlands",
            [176, 96, 60],
            (0.1, 0.5),
            1.2,
            1.0,
            &["raider", "scorpion"],
            4,
            vec![Rock, Ore, Gem],
        ),
        entry(
            BiomeId::FrozenWastes,
            "Frozen Wastes",
            [220, 232, 240],
            (0.15, 0.6),
            1.0,
            0.8,
            &["ice_wraith", "yeti"],
            5,
            vec![Rock, Ore, Gem],
        ),
    ]
}

/// Lookup table from biome id to definition.
///
/// Lookups never fail: a missing id resolves to the fallback (plains)
/// definition and is reported.
#[derive(Debug)]
pub struct BiomeTable {
    entries: BTreeMap<BiomeId, BiomeDefinition>,
    fallback: BiomeDefinition,
    fallback_hits: AtomicU64,
}

impl BiomeTable {
    /// Build a table from definitions. Later duplicates replace earlier ones.
    pub fn new(definitions: impl IntoIterator<Item = BiomeDefinition>) -> Self {
        let entries: BTreeMap<_, _> = definitions.into_iter().map(|def| (def.id, def)).collect();
        let fallback = entries
            .get(&BiomeId::Plains)
            .cloned()
            .unwrap_or_else(BiomeDefinition::fallback);
        Self {
            entries,
            fallback,
            fallback_hits: AtomicU64::new(0),
        }
    }

    /// Strict lookup.
    pub fn try_get(&self, id: BiomeId) -> Result<&BiomeDefinition, WorldError> {
        self.entries
            .get(&id)
            .ok_or_else(|| WorldError::UnknownBiome(id.as_str().to_string()))
    }

    /// Lookup that substitutes the fallback definition for missing ids.
    pub fn get(&self, id: BiomeId) -> &BiomeDefinition {
        match self.try_get(id) {
            Ok(def) => def,
            Err(err) => {
                self.fallback_hits.fetch_add(1, Ordering::Relaxed);
                warn!(biome = %id, "{err}, falling back to {}", self.fallback.id);
                &self.fallback
            }
        }
    }

    /// Definition used for missing ids.
    pub fn fallback(&self) -> &BiomeDefinition {
        &self.fallback
    }

    /// Number of lookups that fell back since construction.
    pub fn fallback_hits(&self) -> u64 {
        self.fallback_hits.load(Ordering::Relaxed)
    }

    /// Whether `id` has its own entry.
    pub fn contains(&self, id: BiomeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps tile coordinates to biome ids.
#[derive(Debug)]
pub struct BiomeClassifier {
    noise: NoiseField,
    noise_scale: f64,
    towns: Vec<StarterTown>,
    town_radius: f64,
    zoning: ZoningRules,
    table: BiomeTable,
}

impl BiomeClassifier {
    /// Build a classifier (and its biome table) from configuration.
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            noise: NoiseField::new(NoiseConfig::biome()),
            noise_scale: config.biome_noise_scale,
            towns: config.towns.clone(),
            town_radius: config.town_radius,
            zoning: config.zoning.clone(),
            table: BiomeTable::new(config.biomes.iter().cloned()),
        }
    }

    /// Classify a tile. First matching rule wins; order is significant.
    pub fn classify(&self, tile_x: i32, tile_z: i32) -> BiomeId {
        let pos = TilePos::new(tile_x, tile_z);
        if self.is_safe_town(pos) {
            return BiomeId::SafeTown;
        }

        let noise = self.zoning_noise(pos);
        let distance = ((tile_x as f64).powi(2) + (tile_z as f64).powi(2)).sqrt();
        let rules = &self.zoning;

        // Thresholds are inclusive so a value on a boundary takes the branch
        // tested first.
        if noise <= rules.water_cutoff {
            BiomeId::Lake
        } else if distance <= rules.inner_radius {
            if noise >= rules.lush_threshold {
                BiomeId::Meadow
            } else {
                BiomeId::Plains
            }
        } else if distance <= rules.middle_radius {
            if noise <= rules.forest_below {
                BiomeId::Forest
            } else if noise <= rules.wasteland_below {
                BiomeId::Wasteland
            } else {
                BiomeId::Plains
            }
        } else if noise <= rules.mountains_below {
            BiomeId::Mountains
        } else if noise <= rules.badlands_below {
            BiomeId::Badlands
        } else {
            BiomeId::FrozenWastes
        }
    }

    /// Classify the tile containing world point `(x, z)`.
    pub fn classify_world(&self, x: f64, z: f64, tile_size: f64) -> BiomeId {
        let pos = TilePos::from_world(x, z, tile_size);
        self.classify(pos.x, pos.z)
    }

    /// Definition for the biome of `pos`, with fallback for missing entries.
    pub fn definition(&self, pos: TilePos) -> &BiomeDefinition {
        self.table.get(self.classify(pos.x, pos.z))
    }

    /// Whether the tile centre lies within the town radius of any anchor.
    pub fn is_safe_town(&self, pos: TilePos) -> bool {
        self.towns
            .iter()
            .any(|town| town.distance_to(pos) <= self.town_radius)
    }

    /// Nearest starter town and its distance in tiles.
    pub fn nearest_town(&self, pos: TilePos) -> Option<(&StarterTown, f64)> {
        self.towns
            .iter()
            .map(|town| (town, town.distance_to(pos)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Starter-town anchors.
    pub fn towns(&self) -> &[StarterTown] {
        &self.towns
    }

    /// Biome table backing this classifier.
    pub fn table(&self) -> &BiomeTable {
        &self.table
    }

    /// Raw zoning noise for a tile.
    pub fn zoning_noise(&self, pos: TilePos) -> f64 {
        self.noise.sample_2d(
            pos.x as f64 * self.noise_scale,
            pos.z as f64 * self.noise_scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> BiomeClassifier {
        BiomeClassifier::new(&WorldConfig::default())
    }

    #[test]
    fn biome_keys_roundtrip() {
        for id in BiomeId::all() {
            assert_eq!(BiomeId::parse(id.as_str()), Some(*id));
        }
        assert_eq!(BiomeId::parse("volcano"), None);
    }

    #[test]
    fn default_table_covers_every_biome() {
        let table = BiomeTable::new(default_biomes());
        for id in BiomeId::all() {
            assert!(table.contains(*id), "missing {}", id);
        }
        assert_eq!(table.len(), BiomeId::all().len());
    }

    #[test]
    fn starter_towns_override_noise() {
        let classifier = classifier();
        for town in classifier.towns() {
            for pos in town.tile.square(1) {
                assert_eq!(classifier.classify(pos.x, pos.z), BiomeId::SafeTown);
            }
        }
    }

    #[test]
    fn world_points_classify_their_containing_tile() {
        let classifier = classifier();
        assert_eq!(classifier.classify_world(50.0, 50.0, 100.0), BiomeId::SafeTown);
        assert_eq!(
            classifier.classify_world(-0.5, 1250.0, 100.0),
            classifier.classify(-1, 12)
        );
        assert_eq!(
            classifier.classify_world(2_345.0, -1_999.0, 100.0),
            classifier.classify(23, -20)
        );
    }

    #[test]
    fn town_radius_excludes_second_ring() {
        let classifier = classifier();
        assert!(!classifier.is_safe_town(TilePos::new(2, 0)));
        assert!(!classifier.is_safe_town(TilePos::new(2, 2)));
    }

    #[test]
    fn classification_follows_zones() {
        let classifier = classifier();
        let rules = ZoningRules::default();
        for x in -40..=40 {
            for z in -40..=40 {
                let pos = TilePos::new(x, z);
                if classifier.is_safe_town(pos) {
                    continue;
                }
                let noise = classifier.zoning_noise(pos);
                let distance = ((x * x + z * z) as f64).sqrt();
                let biome = classifier.classify(x, z);
                if noise <= rules.water_cutoff {
                    assert_eq!(biome, BiomeId::Lake);
                    continue;
                }
                if distance <= rules.inner_radius {
                    assert!(matches!(biome, BiomeId::Plains | BiomeId::Meadow));
                } else if distance <= rules.middle_radius {
                    assert!(matches!(
                        biome,
                        BiomeId::Forest | BiomeId::Wasteland | BiomeId::Plains
                    ));
                } else {
                    assert!(matches!(
                        biome,
                        BiomeId::Mountains | BiomeId::Badlands | BiomeId::FrozenWastes
                    ));
                }
            }
        }
    }

    #[test]
    fn boundary_values_take_first_matching_branch() {
        let mut config = WorldConfig::default();
        config.towns.clear();
        let pos = TilePos::new(15, 0);
        let noise = BiomeClassifier::new(&config).zoning_noise(pos);

        // A value equal to every cutoff lands in the first one tested.
        config.zoning.water_cutoff = noise;
        config.zoning.forest_below = noise;
        config.zoning.wasteland_below = noise;
        assert_eq!(
            BiomeClassifier::new(&config).classify(pos.x, pos.z),
            BiomeId::Lake
        );

        // Forest and wasteland share the boundary; forest is tested first.
        config.zoning.water_cutoff = -2.0;
        assert_eq!(
            BiomeClassifier::new(&config).classify(pos.x, pos.z),
            BiomeId::Forest
        );

        config.zoning.forest_below = noise - 0.01;
        assert_eq!(
            BiomeClassifier::new(&config).classify(pos.x, pos.z),
            BiomeId::Wasteland
        );
    }

    #[test]
    fn ring_radius_boundary_stays_in_the_inner_ring() {
        let mut config = WorldConfig::default();
        config.towns.clear();
        config.zoning.water_cutoff = -2.0;
        let pos = TilePos::new(10, 0);
        let noise = BiomeClassifier::new(&config).zoning_noise(pos);

        config.zoning.inner_radius = 10.0;
        config.zoning.lush_threshold = noise;
        assert_eq!(
            BiomeClassifier::new(&config).classify(pos.x, pos.z),
            BiomeId::Meadow
        );

        config.zoning.lush_threshold = noise + 0.01;
        assert_eq!(
            BiomeClassifier::new(&config).classify(pos.x, pos.z),
            BiomeId::Plains
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classifier();
        let b = classifier();
        for x in -20..20 {
            for z in -20..20 {
                assert_eq!(a.classify(x, z), b.classify(x, z));
            }
        }
    }

    #[test]
    fn missing_entry_falls_back_to_plains() {
        let defs = default_biomes()
            .into_iter()
            .filter(|def| def.id != BiomeId::Forest);
        let table = BiomeTable::new(defs);
        assert!(table.try_get(BiomeId::Forest).is_err());
        let def = table.get(BiomeId::Forest);
        assert_eq!(def.id, BiomeId::Plains);
        table.get(BiomeId::Forest);
        assert_eq!(table.fallback_hits(), 2);
    }

    #[test]
    fn every_fallback_lookup_is_logged() {
        let defs = default_biomes()
            .into_iter()
            .filter(|def| def.id != BiomeId::Lake);
        let table = BiomeTable::new(defs);
        let warnings = tileworld_testkit::count_warnings(|| {
            for _ in 0..3 {
                table.get(BiomeId::Lake);
            }
            table.get(BiomeId::Plains);
        });
        assert_eq!(warnings, 3);
        assert_eq!(table.fallback_hits(), 3);
    }

    #[test]
    fn empty_table_uses_builtin_fallback() {
        let table = BiomeTable::new(Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.get(BiomeId::Mountains), &BiomeDefinition::fallback());
    }

    #[test]
    fn nearest_town_picks_closest_anchor() {
        let classifier = classifier();
        let (town, distance) = classifier.nearest_town(TilePos::new(10, 1)).unwrap();
        assert_eq!(town.tile, TilePos::new(12, 0));
        assert!((distance - 5f64.sqrt()).abs() < 1e-9);
    }
}
