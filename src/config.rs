use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tileworld_server::ScheduleConfig;
use tileworld_world::WorldConfig;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/server.toml";
const DEFAULT_SAVE_DIR: &str = "saves/world";

/// Host configuration: world tunables, timer cadence and where tiles are saved.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding region files.
    pub save_dir: PathBuf,
    /// Keep tiles in memory only; nothing survives a restart.
    pub no_save: bool,
    pub schedule: ScheduleConfig,
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
            no_save: false,
            schedule: ScheduleConfig::default(),
            world: WorldConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document, filling omitted fields with defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let mut config: ServerConfig =
            toml::from_str(input).context("Failed to parse server config")?;
        config.world = config.world.sanitized();
        Ok(config)
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err:#}. Using defaults", path.display());
                    ServerConfig::default()
                }
            },
            Err(err) => {
                if path != Path::new(DEFAULT_CONFIG_PATH)
                    || err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                } else {
                    warn!(
                        "Server config not found at {}. Using defaults",
                        path.display()
                    );
                }
                ServerConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileworld_server::TimerKind;

    #[test]
    fn partial_documents_keep_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            save_dir = "/tmp/elsewhere"

            [schedule]
            snapshot_secs = 60.0

            [world]
            ring_radius = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.save_dir, PathBuf::from("/tmp/elsewhere"));
        assert!(!config.no_save);
        assert_eq!(
            config.schedule.period(TimerKind::Snapshot),
            Some(std::time::Duration::from_secs(60))
        );
        assert_eq!(
            config.schedule.period(TimerKind::DirtyFlush),
            Some(std::time::Duration::from_secs(30))
        );
        assert_eq!(config.world.ring_radius, 3);
        assert_eq!(config.world.core_radius, 1);
        assert_eq!(config.world.tile_size, 100.0);
    }

    #[test]
    fn nested_world_values_are_sanitized() {
        let config = ServerConfig::from_toml_str(
            r#"
            [world]
            core_radius = 4
            ring_radius = 2
            resolution = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.world.ring_radius, 4);
        assert_eq!(config.world.resolution, 2);
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let config = ServerConfig::load_from_path(Path::new("/nonexistent/tileworld.toml"));
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!(
            "tileworld_bad_config_{}.toml",
            std::process::id()
        ));
        fs::write(&path, "schedule = [").unwrap();
        assert_eq!(ServerConfig::load_from_path(&path), ServerConfig::default());
        let _ = fs::remove_file(path);
    }
}
