#![warn(missing_docs)]
//! Authoritative world host: timers, player feed and background persistence
//! around one [`tileworld_world::TileWorld`].

mod feed;
mod host;
mod schedule;
mod worker;

pub use feed::{PositionFeed, SharedPositions};
pub use host::{HostHandle, HostStatus, WorldHost};
pub use schedule::{ScheduleConfig, TimerKind};
pub use worker::PersistenceWorker;
