//! tileworld - host for a deterministic, player-driven procedural tile world
//!
//! Runs the world host until interrupted, then writes a final snapshot.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{ServerConfig, DEFAULT_CONFIG_PATH};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tileworld_core::PlayerId;
use tileworld_server::{PositionFeed, SharedPositions, WorldHost};
use tileworld_world::{MemoryStore, RegionStore, TileStore, TileWorld};
use tracing::{info, warn};

/// Procedural tile world host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory for region files, overriding the config file
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Keep tiles in memory only
    #[arg(long, default_value_t = false)]
    no_save: bool,

    /// Number of simulated players circling the spawn town
    #[arg(long, default_value_t = 0)]
    demo_players: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting tileworld v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let mut config = ServerConfig::load_from_path(&args.config);
    if let Some(dir) = args.save_dir {
        config.save_dir = dir;
    }
    config.no_save |= args.no_save;

    let store: Arc<dyn TileStore> = if config.no_save {
        warn!("Saving disabled, tiles live in memory only");
        Arc::new(MemoryStore::new())
    } else {
        info!(dir = %config.save_dir.display(), "Saving tiles");
        Arc::new(RegionStore::new(&config.save_dir).context("Failed to open save directory")?)
    };

    let tile_size = config.world.tile_size;
    let world = TileWorld::new(config.world);
    let positions = SharedPositions::new();
    let feed: Arc<dyn PositionFeed> = Arc::new(positions.clone());
    let (handle, host) = WorldHost::spawn(world, feed, store, config.schedule);

    let demo = (args.demo_players > 0)
        .then(|| tokio::spawn(walk_demo_players(positions, args.demo_players, tile_size)));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Interrupted, shutting down");

    if let Some(demo) = demo {
        demo.abort();
    }
    let report = handle.shutdown().await?;
    info!(
        version = report.world_version,
        saved = report.saved.len(),
        failed = report.failed.len(),
        "Final snapshot"
    );
    host.await.context("World host panicked")?
}

/// Move `count` players on circles of growing radius around the origin, one
/// step per second.
async fn walk_demo_players(positions: SharedPositions, count: u64, tile_size: f64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut step = 0u64;
    loop {
        ticker.tick().await;
        for id in 0..count {
            let radius = tile_size * 2.0 * (id + 1) as f64;
            let phase = id as f64 * std::f64::consts::TAU / count as f64;
            let angle = phase + step as f64 * 0.02;
            positions.update(PlayerId(id), radius * angle.cos(), radius * angle.sin());
        }
        step += 1;
    }
}
