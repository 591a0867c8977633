//! Bench settings and line definitions

use crate::core::transport::{LineConfig, DEFAULT_GUARD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("Cannot access {}: {source}", path.display())]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("Invalid configuration in {}: {source}", path.display())]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// Could not serialize the configuration
    #[error("Cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid values
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bench timing and directories
    pub bench: BenchSettings,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Named lines attached to every loaded test
    pub lines: Vec<LineConfig>,
}

impl AppConfig {
    /// Load from the default location; defaults if the file does not exist
    pub fn load() -> Result<Self, ConfigError> {
        match super::default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject duplicate line names and unusable timings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Duration::try_from_secs_f64(self.bench.guard_secs).is_err() {
            return Err(ConfigError::Invalid(format!(
                "guard_secs must be a non-negative number of seconds, got {}",
                self.bench.guard_secs
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for line in &self.lines {
            if !seen.insert(line.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate line `{}`", line.name)));
            }
        }
        Ok(())
    }

    /// Add or replace a line by name
    pub fn upsert_line(&mut self, line: LineConfig) {
        match self.lines.iter_mut().find(|l| l.name == line.name) {
            Some(existing) => *existing = line,
            None => self.lines.push(line),
        }
    }
}

/// Bench timing and directories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    /// Guard window after opening a line, in seconds
    pub guard_secs: f64,
    /// Receive polling slice in milliseconds
    pub poll_interval_ms: u64,
    /// Directory of `*.atm` scripts to register at startup
    pub tests_dir: Option<PathBuf>,
    /// Default export directory
    pub results_dir: Option<PathBuf>,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            guard_secs: DEFAULT_GUARD.as_secs_f64(),
            poll_interval_ms: 10,
            tests_dir: None,
            results_dir: None,
        }
    }
}

impl BenchSettings {
    /// Guard window as a duration; out-of-range values saturate
    pub fn guard(&self) -> Duration {
        Duration::try_from_secs_f64(self.guard_secs).unwrap_or(if self.guard_secs > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        })
    }

    /// Polling slice as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter (overridden by `RUST_LOG`)
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
    /// Also write diagnostics to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::SerialParity;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.bench.guard(), Duration::from_secs(2));
        assert_eq!(config.bench.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.logging.level, "info");
        assert!(config.lines.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            [bench]
            guard_secs = 0.5
            tests_dir = "scripts"

            [logging]
            level = "debug"

            [[lines]]
            name = "iic"
            port = "/dev/ttyUSB0"
            baud = 115200
            parity = "even"

            [[lines]]
            name = "uart"
            port = "loop"
            loopback = true
            post_tx_guard_ms = 20
        "#;

        let config: AppConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bench.guard(), Duration::from_millis(500));
        assert_eq!(config.bench.poll_interval_ms, 10);
        assert_eq!(config.bench.tests_dir, Some(PathBuf::from("scripts")));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.lines.len(), 2);
        assert_eq!(config.lines[0].parity, SerialParity::Even);
        assert_eq!(config.lines[0].data_bits, 8);
        assert!(config.lines[1].loopback);
        assert_eq!(config.lines[1].baud, 9600);
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.lines.push(LineConfig::loopback("iic"));
        config.lines.push(LineConfig::loopback("iic"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.bench.guard_secs = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_guard_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bench]\nguard_secs = 1e300\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Invalid(_))));

        let mut bench = BenchSettings::default();
        for secs in [1e300, f64::INFINITY] {
            bench.guard_secs = secs;
            assert_eq!(bench.guard(), Duration::MAX);
        }
        for secs in [-1.0, f64::NAN] {
            bench.guard_secs = secs;
            assert_eq!(bench.guard(), Duration::ZERO);
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.upsert_line(LineConfig::new("iic", "/dev/ttyS0", 9600));
        config.upsert_line(LineConfig::new("iic", "/dev/ttyS1", 19200));
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.lines.len(), 1);
        assert_eq!(loaded.lines[0].port, "/dev/ttyS1");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(AppConfig::load_from(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[[lines]]\nname = 3\n").unwrap();
        assert!(matches!(AppConfig::load_from(&bad), Err(ConfigError::Parse { .. })));
    }
}
