//! Configuration file management for flightplan.
//!
//! Reads/writes `~/.flightplan/config.toml` with gazetteer paths, database
//! location, pipeline options and logging settings. Every key is optional;
//! missing keys take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::region_id::DEFAULT_FALLBACK_REGION_ID;
use crate::types::{FlightPlanError, Result};

/// Full configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gazetteer: GazetteerConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazetteerConfig {
    /// GeoJSON FeatureCollection of region polygons.
    pub path: String,
    /// Separate id reference; the polygon file is used when unset.
    pub region_ids_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    /// PostgreSQL URL; takes precedence over `path` when the server is built
    /// with the `postgres` feature.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fallback_region_id: i32,
    /// Directory for per-stage CSV dumps.
    pub keep_intermediates: Option<String>,
    /// Row-parallel worker count; 0 lets rayon decide.
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub file: String,
    pub level: String,
}

impl Default for GazetteerConfig {
    fn default() -> Self {
        GazetteerConfig {
            path: "data/russia_regions.geojson".into(),
            region_ids_path: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "data/flightplan.db".into(),
            url: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            fallback_region_id: DEFAULT_FALLBACK_REGION_ID,
            keep_intermediates: None,
            threads: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            dir: "logs".into(),
            file: "flightplan.log".into(),
            level: "info".into(),
        }
    }
}

/// Get the config directory path (`~/.flightplan/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".flightplan")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.flightplan/config.toml`.
///
/// Returns default config if the file doesn't exist or can't be parsed.
pub fn load_config() -> Config {
    load_from(&config_file()).unwrap_or_default()
}

/// Load config from an explicit path. A missing file yields the defaults;
/// an unreadable or malformed one is an error.
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Save config to `~/.flightplan/config.toml`.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    let path = config_file();
    save_to(config, &path)?;
    Ok(path)
}

pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| FlightPlanError::Config(e.to_string()))?;
    }
    let text = serialize_config(config)?;
    std::fs::write(path, text).map_err(|e| FlightPlanError::Config(e.to_string()))?;
    Ok(())
}

fn parse_config(text: &str) -> Result<Config> {
    toml::from_str(text).map_err(|e| FlightPlanError::Config(e.to_string()))
}

pub fn serialize_config(config: &Config) -> Result<String> {
    let body = toml::to_string_pretty(config).map_err(|e| FlightPlanError::Config(e.to_string()))?;
    Ok(format!("# flightplan configuration\n\n{body}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.fallback_region_id, 91);
        assert_eq!(config.logging.file, "flightplan.log");
        assert!(config.database.url.is_none());
        assert!(config.gazetteer.region_ids_path.is_none());
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
[gazetteer]
path = "/srv/regions.geojson"
region_ids_path = "/srv/ids.geojson"

[database]
path = "/tmp/test.db"
url = "postgres://flight@localhost/flights"

[pipeline]
fallback_region_id = 0
keep_intermediates = "/tmp/stages"
threads = 4

[logging]
level = "debug"
"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.gazetteer.path, "/srv/regions.geojson");
        assert_eq!(config.gazetteer.region_ids_path.as_deref(), Some("/srv/ids.geojson"));
        assert_eq!(config.database.path, "/tmp/test.db");
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://flight@localhost/flights")
        );
        assert_eq!(config.pipeline.fallback_region_id, 0);
        assert_eq!(config.pipeline.threads, 4);
        assert_eq!(config.logging.level, "debug");
        // Unset keys keep their defaults.
        assert_eq!(config.logging.dir, "logs");
    }

    #[test]
    fn test_partial_config() {
        let config = parse_config("[database]\npath = \"x.db\"\n").unwrap();
        assert_eq!(config.database.path, "x.db");
        assert_eq!(config.gazetteer, GazetteerConfig::default());
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_malformed_is_error() {
        assert!(matches!(
            parse_config("[pipeline]\nthreads = \"many\"\n"),
            Err(FlightPlanError::Config(_))
        ));
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.database.url = Some("postgres://localhost/flights".into());
        config.pipeline.keep_intermediates = Some("stages".into());
        config.pipeline.threads = 2;

        save_to(&config, &path).unwrap();
        let parsed = load_from(&path).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
