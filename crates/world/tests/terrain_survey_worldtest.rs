//! Terrain survey worldtest
//!
//! Generates a block of tiles around the origin and records generation cost,
//! biome spread and seam quality. Also runs the bounding-box diagnostics over
//! a resident neighbourhood.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tileworld_core::{PlayerId, PlayerPosition, TilePos};
use tileworld_testkit::{
    MetricsReportBuilder, MetricsSink, SeamValidation, TerrainMetrics, TestExecutionMetrics,
    TestResult,
};
use tileworld_world::{
    check_seam_continuity, HeightSampler, TileGenerator, TileWorld, WorldConfig,
};

const SURVEY_RADIUS: i32 = 6;

#[test]
fn terrain_survey_worldtest() {
    println!("\n=== Terrain Survey Worldtest ===\n");
    let test_start = Instant::now();
    let config = Arc::new(WorldConfig::default());
    let sampler = Arc::new(HeightSampler::new(Arc::clone(&config)));
    let generator = TileGenerator::new(Arc::clone(&sampler));

    // ═══════════════════════════════════════════════════════════════════════
    // Phase 1: Generation
    // ═══════════════════════════════════════════════════════════════════════

    println!("Phase 1: Generating {0}x{0} tiles...", SURVEY_RADIUS * 2 + 1);
    let mut gen_times = Vec::new();
    let mut biomes = BTreeSet::new();
    let mut vertices = 0usize;
    for pos in TilePos::new(0, 0).square(SURVEY_RADIUS) {
        let start = Instant::now();
        let tile = generator.generate(pos);
        gen_times.push(start.elapsed().as_micros());
        biomes.insert(tile.biome());
        vertices += tile.heights().len();
    }
    println!("  Biomes seen: {:?}", biomes);

    // ═══════════════════════════════════════════════════════════════════════
    // Phase 2: Seams
    // ═══════════════════════════════════════════════════════════════════════

    println!("Phase 2: Validating seams...");
    let mut total_seams = 0;
    let mut seams_failed = 0;
    for pos in TilePos::new(0, 0).square(SURVEY_RADIUS - 1) {
        for neighbour in [TilePos::new(pos.x + 1, pos.z), TilePos::new(pos.x, pos.z + 1)] {
            total_seams += 1;
            if !check_seam_continuity(&sampler, pos, neighbour, 1e-9) {
                seams_failed += 1;
            }
        }
    }
    println!("  {total_seams} seams, {seams_failed} failed");

    // ═══════════════════════════════════════════════════════════════════════
    // Phase 3: Bounds diagnostics
    // ═══════════════════════════════════════════════════════════════════════

    println!("Phase 3: Checking resident bounds...");
    let mut world = TileWorld::new(WorldConfig::default());
    world.run_lifecycle_pass(&[
        PlayerPosition::new(PlayerId(1), 50.0, 50.0),
        PlayerPosition::new(PlayerId(2), -550.0, 1250.0),
    ]);
    let anomalies = world.check_anomalies();
    println!(
        "  Checked {} tiles, {} anomalies",
        anomalies.checked,
        anomalies.anomalies.len()
    );

    let passed = seams_failed == 0 && anomalies.is_clean();
    let mut terrain = TerrainMetrics::from_timings(&gen_times, vertices, biomes.len());
    terrain.seam_validation = Some(SeamValidation {
        total_seams,
        seams_valid: total_seams - seams_failed,
        seams_failed,
        max_seam_diff: 0.0,
    });
    let metrics = MetricsReportBuilder::new("terrain_survey_worldtest")
        .result(TestResult::from_passed(passed))
        .terrain(terrain)
        .execution(TestExecutionMetrics::counted(
            test_start.elapsed(),
            total_seams + anomalies.checked,
            seams_failed + anomalies.anomalies.len(),
        ))
        .build();
    MetricsSink::for_test("terrain_survey_worldtest")
        .and_then(|sink| sink.write(&metrics))
        .expect("metrics written");

    assert_eq!(seams_failed, 0);
    assert_eq!(anomalies.checked, 50);
    assert!(anomalies.is_clean(), "{:?}", anomalies.anomalies);
    // Towns, plains, meadows and lakes all appear within six tiles.
    assert!(biomes.len() >= 3, "only {:?}", biomes);
}
