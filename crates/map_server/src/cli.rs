//! Command-line interface for the map server.

use clap::Parser;
use std::path::PathBuf;

/// Command line arguments. Every option overrides the matching value from
/// the configuration file.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Tile map and spatial object service", long_about = None)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Skip seeding demo objects on startup
    #[arg(long)]
    pub no_seed: bool,

    /// Number of regions to partition the map into
    #[arg(long, value_name = "N")]
    pub regions: Option<usize>,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config.toml"),
            log_level: None,
            json_logs: false,
            no_seed: false,
            regions: None,
        }
    }
}
