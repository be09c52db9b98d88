//! Configuration management for the map server.
//!
//! Settings are read from a TOML file, created with defaults on first start,
//! and then overridden by command-line arguments.

use crate::cli::CliArgs;
use anyhow::Context;
use map_core::{CoordinateMapper, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub map: MapSettings,
    #[serde(default)]
    pub regions: RegionSettings,
    #[serde(default)]
    pub seed: SeedSettings,
    #[serde(default)]
    pub broadcast: BroadcastSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Grid dimensions in tiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            width: 500,
            height: 500,
        }
    }
}

/// Region partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSettings {
    /// Number of regions the grid is split into
    pub count: usize,
    /// Passed to region generation and logged; the layout itself is fixed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Region names become "{prefix} {id}" when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            count: 8,
            seed: None,
            name_prefix: None,
        }
    }
}

/// Demo objects created at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedSettings {
    pub enabled: bool,
    pub objects_per_region: usize,
    /// Side length of every seeded object, in tiles
    pub object_size: i32,
    pub rng_seed: u64,
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            objects_per_region: 5,
            object_size: 10,
            rng_seed: 42,
        }
    }
}

/// Change broadcaster queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Updates buffered per subscriber before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Seconds between statistics reports (0 disables them)
    pub stats_interval_secs: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            stats_interval_secs: 60,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written to
    /// `path` and the defaults are returned.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write default config to {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if args.no_seed {
            self.seed.enabled = false;
        }
        if let Some(count) = args.regions {
            self.regions.count = count;
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.map.width == 0 || self.map.height == 0 {
            return Err(format!(
                "Map dimensions must be positive, got {}x{}",
                self.map.width, self.map.height
            ));
        }

        // the grid must fit inside the geo projection
        CoordinateMapper::new(self.map.width, self.map.height).map_err(|e| e.to_string())?;

        let tiles = self.map.width as u64 * self.map.height as u64;
        let max_regions = tiles.min(u16::MAX as u64);
        if self.regions.count == 0 || self.regions.count as u64 > max_regions {
            return Err(format!(
                "Region count must be between 1 and {}, got {}",
                max_regions, self.regions.count
            ));
        }

        if self.seed.enabled && self.seed.object_size <= 0 {
            return Err(format!(
                "Seed object size must be positive, got {}",
                self.seed.object_size
            ));
        }

        if self.broadcast.queue_capacity == 0 {
            return Err("Broadcast queue capacity must be positive".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
