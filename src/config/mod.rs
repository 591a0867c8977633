//! Configuration module
//!
//! Handles bench settings, logging options and line definitions

mod settings;

pub use settings::{AppConfig, BenchSettings, ConfigError, LoggingConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "atmos", "atmos").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "atmos", "atmos").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default configuration file location
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Default directory for exported results
pub fn results_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("results"))
}
