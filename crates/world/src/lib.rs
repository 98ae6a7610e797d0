mod anomaly;
mod biome;
mod config;
mod heightmap;
mod lifecycle;
mod noise;
mod persist;
mod queries;
mod roads;
mod scheduler;
mod simulation;
mod storage;
mod terrain;
mod tile;
mod world;

pub use anomaly::*;
pub use biome::*;
pub use config::*;
pub use heightmap::*;
pub use lifecycle::*;
pub use noise::*;
pub use persist::*;
pub use queries::*;
pub use roads::*;
pub use scheduler::*;
pub use simulation::*;
pub use storage::*;
pub use terrain::*;
pub use tile::*;
pub use world::*;
