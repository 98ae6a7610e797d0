//! Lifecycle worldtest: player-driven residency
//!
//! Drives `TileWorld` with scripted position feeds and checks:
//! - Core tiles are simulated, ring tiles rendered only, the rest absent
//! - Shared tiles keep one reference per interested player
//! - Evicted tiles come back with identical state, from the archive or regenerated
//! - Dirty tiles are queued on eviction and restored with their changes
//! - A tile is resident exactly when some player references it

use std::time::Instant;

use tileworld_core::{PlayerId, PlayerPosition, TilePos};
use tileworld_testkit::{
    JsonlSink, LifecycleMetrics, MetricsReportBuilder, MetricsSink, ScriptedPlayers,
    TestExecutionMetrics, TestResult,
};
use tileworld_world::{DirtyFlags, TileState, TileWorld, WorldConfig};

const TILE_SIZE: f64 = 100.0;

fn player_at_tile(id: u64, tile: TilePos) -> PlayerPosition {
    let (x, z) = tile.center(TILE_SIZE);
    PlayerPosition::new(PlayerId(id), x, z)
}

#[test]
fn single_player_spawn_loads_core_and_ring() {
    let mut world = TileWorld::new(WorldConfig::default());
    let report = world.run_lifecycle_pass(&[PlayerPosition::new(PlayerId(1), 50.0, 50.0)]);

    assert_eq!(report.required, 25);
    assert_eq!(report.generated, 25);
    assert_eq!(report.resident, 25);
    assert_eq!(report.simulated, 9);
    assert_eq!(report.rendered_only, 16);

    for pos in TilePos::new(0, 0).square(2) {
        let expected = if pos.ring_distance(TilePos::new(0, 0)) <= 1 {
            TileState::Simulated
        } else {
            TileState::RenderedOnly
        };
        assert_eq!(world.tile_state(pos), expected, "tile {pos}");
        assert_eq!(world.lifecycle().ref_count(pos), 1, "tile {pos}");
        let tile = world.tile(pos).expect("resident");
        assert_eq!(tile.ref_count(), 1);
        assert_eq!(tile.is_simulated(), expected == TileState::Simulated);
    }

    for pos in [TilePos::new(3, 0), TilePos::new(0, -3), TilePos::new(-3, 3)] {
        assert_eq!(world.tile_state(pos), TileState::Absent, "tile {pos}");
        assert!(world.tile(pos).is_none());
    }

    assert!(world.gate().allows_mob_spawns(TilePos::new(1, 1)));
    assert!(!world.gate().allows_mob_spawns(TilePos::new(2, 2)));
}

#[test]
fn shared_tiles_count_each_player_once() {
    let mut world = TileWorld::new(WorldConfig::default());
    let a = player_at_tile(1, TilePos::new(0, 0));
    let b = player_at_tile(2, TilePos::new(1, 0));

    world.run_lifecycle_pass(&[a, b]);
    assert_eq!(world.lifecycle().ref_count(TilePos::new(1, 0)), 2);
    assert_eq!(world.lifecycle().ref_count(TilePos::new(0, 0)), 2);
    assert_eq!(world.lifecycle().ref_count(TilePos::new(-2, 0)), 1);
    assert_eq!(world.lifecycle().ref_count(TilePos::new(3, 0)), 1);
    assert_eq!(world.lifecycle().core_count(TilePos::new(1, 0)), 2);
    assert_eq!(world.lifecycle().core_count(TilePos::new(2, 0)), 1);
    assert_eq!(world.lifecycle().core_count(TilePos::new(-2, 0)), 0);
    // 5x6 union of two overlapping 5x5 squares
    assert_eq!(world.resident_count(), 30);

    let a_far = player_at_tile(1, TilePos::new(10, 0));
    let report = world.run_lifecycle_pass(&[a_far, b]);

    assert_eq!(world.lifecycle().ref_count(TilePos::new(1, 0)), 1);
    assert_eq!(world.tile(TilePos::new(1, 0)).expect("still resident").ref_count(), 1);
    assert_eq!(world.tile_state(TilePos::new(1, 0)), TileState::Simulated);
    assert_eq!(world.tile_state(TilePos::new(-1, 0)), TileState::RenderedOnly);
    assert_eq!(world.tile_state(TilePos::new(-2, 0)), TileState::Absent);
    assert_eq!(world.tile_state(TilePos::new(10, 0)), TileState::Simulated);
    // Squares at x = 8..=12 and x = -1..=3 are disjoint.
    assert_eq!(report.resident, 50);
    assert_eq!(report.evicted, 5);
}

#[test]
fn evicted_tiles_reload_identically() {
    let mut world = TileWorld::new(WorldConfig::default());
    let home = player_at_tile(1, TilePos::new(0, 0));
    world.run_lifecycle_pass(&[home]);

    let before: Vec<_> = TilePos::new(0, 0)
        .square(2)
        .map(|pos| {
            let tile = world.tile(pos).expect("resident");
            (pos, tile.biome(), tile.heights().to_vec(), tile.resources().to_vec())
        })
        .collect();

    world.run_lifecycle_pass(&[player_at_tile(1, TilePos::new(20, 20))]);
    for (pos, ..) in &before {
        assert_eq!(world.tile_state(*pos), TileState::Absent, "tile {pos}");
    }

    let report = world.run_lifecycle_pass(&[home]);
    assert_eq!(report.restored, 25);
    assert_eq!(report.generated, 0);

    for (pos, biome, heights, resources) in before {
        let tile = world.tile(pos).expect("resident again");
        assert_eq!(tile.biome(), biome, "tile {pos}");
        assert_eq!(tile.heights(), heights.as_slice(), "tile {pos}");
        assert_eq!(tile.resources(), resources.as_slice(), "tile {pos}");
    }
}

#[test]
fn regenerated_tiles_match_their_first_generation() {
    let config = WorldConfig {
        archive_capacity: 1,
        ..WorldConfig::default()
    };
    let mut world = TileWorld::new(config);
    let home = player_at_tile(1, TilePos::new(-3, 7));
    world.run_lifecycle_pass(&[home]);

    let before: Vec<_> = TilePos::new(-3, 7)
        .square(2)
        .map(|pos| {
            let tile = world.tile(pos).expect("resident");
            (pos, tile.biome(), tile.heights().to_vec(), tile.roads().to_vec())
        })
        .collect();

    world.run_lifecycle_pass(&[player_at_tile(1, TilePos::new(30, 30))]);
    let report = world.run_lifecycle_pass(&[home]);
    assert!(report.generated >= 24, "only {} regenerated", report.generated);
    assert_eq!(report.generated + report.restored, 25);

    for (pos, biome, heights, roads) in before {
        let tile = world.tile(pos).expect("resident again");
        assert_eq!(tile.biome(), biome, "tile {pos}");
        assert_eq!(tile.heights(), heights.as_slice(), "tile {pos}");
        assert_eq!(tile.roads(), roads.as_slice(), "tile {pos}");
    }
}

#[test]
fn dirty_tiles_are_queued_and_restored() {
    let mut world = TileWorld::new(WorldConfig::default());
    let home = player_at_tile(1, TilePos::new(0, 0));
    world.run_lifecycle_pass(&[home]);

    let (pos, node_id) = TilePos::new(0, 0)
        .square(2)
        .find_map(|pos| {
            let tile = world.tile(pos)?;
            tile.resources().first().map(|node| (pos, node.id.clone()))
        })
        .expect("some resident tile carries resources");
    let harvested = world.remove_resource(pos, &node_id).expect("node exists");
    assert_eq!(harvested.id, node_id);
    assert!(world.mark_dirty(TilePos::new(0, 0), DirtyFlags::STATE));

    let away = world.run_lifecycle_pass(&[player_at_tile(1, TilePos::new(30, 0))]);
    assert!(away.queued >= 1);
    assert_eq!(world.tile_state(pos), TileState::Evicting);
    assert_eq!(world.tile_state(TilePos::new(0, 0)), TileState::Evicting);

    world.run_lifecycle_pass(&[home]);
    let tile = world.tile(pos).expect("restored");
    assert!(tile.resources().iter().all(|node| node.id != node_id));
    assert!(tile.needs_save());
    assert!(tile.dirty_flags().contains(DirtyFlags::RESOURCES));
    assert!(world
        .tile(TilePos::new(0, 0))
        .expect("restored")
        .dirty_flags()
        .contains(DirtyFlags::STATE));
}

#[test]
fn empty_feed_evicts_everything() {
    let mut world = TileWorld::new(WorldConfig::default());
    world.run_lifecycle_pass(&[player_at_tile(1, TilePos::new(4, -4))]);
    let report = world.run_lifecycle_pass(&[]);
    assert_eq!(report.evicted, 25);
    assert_eq!(report.resident, 0);
    assert_eq!(world.resident_count(), 0);
    assert_eq!(world.gate().simulated_len(), 0);
}

#[test]
fn residency_matches_references_over_scripted_walk() {
    println!("\n=== Lifecycle Residency Worldtest ===\n");
    let test_start = Instant::now();

    let mut world = TileWorld::new(WorldConfig::default());
    let walker = ScriptedPlayers::walk_x(1, TilePos::new(-6, 0), 12, TILE_SIZE);
    let mut events = JsonlSink::create(
        std::env::temp_dir().join(format!("tileworld-lifecycle-{}.jsonl", std::process::id())),
    )
    .expect("event log");

    let mut metrics = LifecycleMetrics::default();
    let mut assertions = 0usize;
    let mut violations = 0usize;

    for (step, frame) in walker.frames().enumerate() {
        // A second player paces between two tiles so some tiles stay shared.
        let pacer = player_at_tile(2, TilePos::new(step as i32 % 2, 1));
        let players = [frame[0], pacer];

        let pass_start = Instant::now();
        let report = world.run_lifecycle_pass(&players);
        metrics.record(&report, pass_start.elapsed());
        events.write_pass(&report).expect("log pass");

        for tile in world.lifecycle().tiles().iter() {
            assertions += 1;
            if tile.ref_count() == 0 || world.lifecycle().ref_count(tile.position()) != tile.ref_count() {
                violations += 1;
            }
        }
        for player in &players {
            let interest = world.lifecycle().interest(player.id).expect("interest");
            for pos in interest.required() {
                assertions += 1;
                if world.tile(pos).is_none() {
                    violations += 1;
                }
            }
        }
    }

    println!("  Passes: {}", metrics.passes);
    println!("  Peak resident: {}", metrics.peak_resident);
    println!(
        "  Generated: {}, restored: {}, evicted: {}",
        metrics.tiles_generated, metrics.tiles_restored, metrics.tiles_evicted
    );
    println!("  Avg pass: {:.2}ms", metrics.avg_pass_time_us / 1000.0);

    let report = MetricsReportBuilder::new("lifecycle_worldtest")
        .result(TestResult::from_passed(violations == 0))
        .lifecycle(metrics.clone())
        .execution(TestExecutionMetrics::counted(
            test_start.elapsed(),
            assertions,
            violations,
        ))
        .build();
    MetricsSink::for_test("lifecycle_worldtest")
        .and_then(|sink| sink.write(&report))
        .expect("metrics written");

    assert_eq!(violations, 0, "resident set drifted from reference counts");
    assert_eq!(metrics.passes, walker.len());
    assert!(metrics.tiles_evicted > 0);
    // Every materialization is either a fresh generation or a restore.
    assert_eq!(
        metrics.tiles_generated,
        world.resident_count() + metrics.tiles_evicted - metrics.tiles_restored
    );
}
