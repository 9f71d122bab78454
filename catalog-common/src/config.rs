//! Configuration loading and validation
//!
//! Configuration is an explicit [`AppConfig`] value handed to the pipeline
//! constructor. Resolution priority (highest first):
//! 1. Environment variables (`CIP_*`)
//! 2. TOML config file (optional)
//! 3. Compiled defaults
//!
//! Out-of-range values are rejected with [`Error::Config`] instead of being
//! silently replaced by defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default image cache directory
pub const DEFAULT_CACHE_DIR: &str = ".cache/images";
/// Default directory for locally published events
pub const DEFAULT_EVENTS_DIR: &str = "outputs/events";
/// Default SQLite warehouse file
pub const DEFAULT_WAREHOUSE_PATH: &str = "outputs/warehouse.sqlite";
/// Default maximum records per batch
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 50;
/// Default maximum title+description characters per record
pub const DEFAULT_MAX_TEXT_CHARS: usize = 10_000;
/// Default requests-per-minute limit
pub const DEFAULT_RPM_LIMIT: i64 = 120;
/// Default per-record wall-clock budget (seconds)
pub const DEFAULT_RECORD_TIMEOUT_S: f64 = 8.0;
/// Default image download timeout (seconds)
pub const DEFAULT_INGEST_TIMEOUT_S: f64 = 10.0;
/// Smallest accepted image download timeout (seconds)
pub const MIN_INGEST_TIMEOUT_S: f64 = 0.1;

/// Runtime configuration for the catalog pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Directory used to cache downloaded images
    pub cache_dir: PathBuf,
    /// HTTP timeout for image downloads
    pub ingest_timeout: Duration,
    /// Abort bulk ingestion on the first error
    pub fail_fast: bool,
    /// Directory for locally published event files
    pub events_dir: PathBuf,
    /// Publish one event per predicted record
    pub enable_publish: bool,
    /// Validate event payloads before publishing
    pub validate_events: bool,
    /// SQLite file used by the warehouse sink
    pub warehouse_path: PathBuf,
    /// Write flattened rows to the warehouse after each batch
    pub enable_warehouse: bool,
    /// Maximum records accepted in one batch
    pub max_batch_items: usize,
    /// Maximum title+description characters per record
    pub max_text_chars: usize,
    /// Requests per minute; 0 disables rate limiting
    pub rpm_limit: i64,
    /// Per-record wall-clock budget; zero disables the check
    pub record_timeout: Duration,
    /// Records processed concurrently within one batch
    pub max_in_flight: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            ingest_timeout: Duration::from_secs_f64(DEFAULT_INGEST_TIMEOUT_S),
            fail_fast: false,
            events_dir: PathBuf::from(DEFAULT_EVENTS_DIR),
            enable_publish: false,
            validate_events: false,
            warehouse_path: PathBuf::from(DEFAULT_WAREHOUSE_PATH),
            enable_warehouse: false,
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            rpm_limit: DEFAULT_RPM_LIMIT,
            record_timeout: Duration::from_secs_f64(DEFAULT_RECORD_TIMEOUT_S),
            max_in_flight: 1,
        }
    }
}

/// TOML file representation; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub cache_dir: Option<PathBuf>,
    pub ingest_timeout_s: Option<f64>,
    pub fail_fast: Option<bool>,
    pub events_dir: Option<PathBuf>,
    pub enable_publish: Option<bool>,
    pub validate_events: Option<bool>,
    pub warehouse_path: Option<PathBuf>,
    pub enable_warehouse: Option<bool>,
    pub max_batch_items: Option<i64>,
    pub max_text_chars: Option<i64>,
    pub rpm_limit: Option<i64>,
    pub record_timeout_s: Option<f64>,
    pub max_in_flight: Option<i64>,
}

impl AppConfig {
    /// Resolve configuration from an optional TOML file plus environment
    ///
    /// A missing TOML file is not an error: a warning is logged and the
    /// defaults are used.
    pub fn load(toml_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
                let toml_config: TomlConfig = toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
                config.apply_toml(&toml_config)?;
                info!("Configuration loaded from {}", path.display());
            } else {
                warn!(
                    "Config file {} not found, using defaults",
                    path.display()
                );
            }
        }

        config.apply_env()?;
        config.validate()?;

        debug!(?config, "Configuration resolved");
        Ok(config)
    }

    /// Overlay values present in a parsed TOML file
    pub fn apply_toml(&mut self, toml: &TomlConfig) -> Result<()> {
        if let Some(dir) = &toml.cache_dir {
            self.cache_dir = dir.clone();
        }
        if let Some(secs) = toml.ingest_timeout_s {
            self.ingest_timeout = seconds("ingest_timeout_s", secs)?;
        }
        if let Some(flag) = toml.fail_fast {
            self.fail_fast = flag;
        }
        if let Some(dir) = &toml.events_dir {
            self.events_dir = dir.clone();
        }
        if let Some(flag) = toml.enable_publish {
            self.enable_publish = flag;
        }
        if let Some(flag) = toml.validate_events {
            self.validate_events = flag;
        }
        if let Some(path) = &toml.warehouse_path {
            self.warehouse_path = path.clone();
        }
        if let Some(flag) = toml.enable_warehouse {
            self.enable_warehouse = flag;
        }
        if let Some(n) = toml.max_batch_items {
            self.max_batch_items = count("max_batch_items", n)?;
        }
        if let Some(n) = toml.max_text_chars {
            self.max_text_chars = count("max_text_chars", n)?;
        }
        if let Some(n) = toml.rpm_limit {
            self.rpm_limit = n;
        }
        if let Some(secs) = toml.record_timeout_s {
            self.record_timeout = seconds("record_timeout_s", secs)?;
        }
        if let Some(n) = toml.max_in_flight {
            self.max_in_flight = count("max_in_flight", n)?;
        }
        Ok(())
    }

    /// Overlay values present in `CIP_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_var("CIP_CACHE_DIR") {
            self.cache_dir = PathBuf::from(value);
        }
        if let Some(value) = env_var("CIP_INGEST_TIMEOUT_S") {
            self.ingest_timeout = seconds("CIP_INGEST_TIMEOUT_S", parse_f64("CIP_INGEST_TIMEOUT_S", &value)?)?;
        }
        if let Some(value) = env_var("CIP_FAIL_FAST") {
            self.fail_fast = parse_bool("CIP_FAIL_FAST", &value)?;
        }
        if let Some(value) = env_var("CIP_EVENTS_DIR") {
            self.events_dir = PathBuf::from(value);
        }
        if let Some(value) = env_var("CIP_ENABLE_PUBLISH") {
            self.enable_publish = parse_bool("CIP_ENABLE_PUBLISH", &value)?;
        }
        if let Some(value) = env_var("CIP_VALIDATE_EVENTS") {
            self.validate_events = parse_bool("CIP_VALIDATE_EVENTS", &value)?;
        }
        if let Some(value) = env_var("CIP_WAREHOUSE_PATH") {
            self.warehouse_path = PathBuf::from(value);
        }
        if let Some(value) = env_var("CIP_ENABLE_WAREHOUSE") {
            self.enable_warehouse = parse_bool("CIP_ENABLE_WAREHOUSE", &value)?;
        }
        if let Some(value) = env_var("CIP_MAX_BATCH_ITEMS") {
            self.max_batch_items = count("CIP_MAX_BATCH_ITEMS", parse_i64("CIP_MAX_BATCH_ITEMS", &value)?)?;
        }
        if let Some(value) = env_var("CIP_MAX_TEXT_CHARS") {
            self.max_text_chars = count("CIP_MAX_TEXT_CHARS", parse_i64("CIP_MAX_TEXT_CHARS", &value)?)?;
        }
        if let Some(value) = env_var("CIP_RPM_LIMIT") {
            self.rpm_limit = parse_i64("CIP_RPM_LIMIT", &value)?;
        }
        if let Some(value) = env_var("CIP_RECORD_TIMEOUT_S") {
            self.record_timeout = seconds("CIP_RECORD_TIMEOUT_S", parse_f64("CIP_RECORD_TIMEOUT_S", &value)?)?;
        }
        if let Some(value) = env_var("CIP_MAX_IN_FLIGHT") {
            self.max_in_flight = count("CIP_MAX_IN_FLIGHT", parse_i64("CIP_MAX_IN_FLIGHT", &value)?)?;
        }
        Ok(())
    }

    /// Check cross-field bounds
    pub fn validate(&self) -> Result<()> {
        if self.ingest_timeout.as_secs_f64() < MIN_INGEST_TIMEOUT_S {
            return Err(Error::Config(format!(
                "ingest timeout must be at least {}s, got {:.3}s",
                MIN_INGEST_TIMEOUT_S,
                self.ingest_timeout.as_secs_f64()
            )));
        }
        if self.max_batch_items == 0 {
            return Err(Error::Config("max_batch_items must be >= 1".to_string()));
        }
        if self.max_text_chars == 0 {
            return Err(Error::Config("max_text_chars must be >= 1".to_string()));
        }
        if self.rpm_limit < 0 {
            return Err(Error::Config(format!(
                "rpm_limit must be >= 0, got {}",
                self.rpm_limit
            )));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Config("max_in_flight must be >= 1".to_string()));
        }
        Ok(())
    }

    /// Whether the per-record timeout check is active
    pub fn record_timeout_enabled(&self) -> bool {
        !self.record_timeout.is_zero()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::Config(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, secs
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn count(name: &str, n: i64) -> Result<usize> {
    if n < 1 {
        return Err(Error::Config(format!("{} must be >= 1, got {}", name, n)));
    }
    usize::try_from(n).map_err(|_| Error::Config(format!("{} out of range: {}", name, n)))
}

fn parse_f64(name: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::Config(format!("{}: invalid number '{}': {}", name, value, e)))
}

fn parse_i64(name: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|e| Error::Config(format!("{}: invalid integer '{}': {}", name, value, e)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{}: invalid boolean '{}'",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_batch_items, 50);
        assert_eq!(config.rpm_limit, 120);
        assert_eq!(config.record_timeout, Duration::from_secs(8));
        assert!(config.record_timeout_enabled());
    }

    #[test]
    fn test_negative_rpm_rejected() {
        let config = AppConfig {
            rpm_limit: -1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_tiny_ingest_timeout_rejected() {
        let config = AppConfig {
            ingest_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seconds_rejects_negative() {
        assert!(seconds("record_timeout_s", -0.5).is_err());
        assert!(seconds("record_timeout_s", f64::NAN).is_err());
        assert_eq!(seconds("record_timeout_s", 0.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_bool_variants() {
        assert!(parse_bool("X", "Yes").unwrap());
        assert!(parse_bool("X", "on").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_apply_toml_overrides() {
        let toml: TomlConfig = toml::from_str(
            r#"
            max_batch_items = 5
            record_timeout_s = 0.0
            enable_publish = true
            "#,
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.apply_toml(&toml).unwrap();

        assert_eq!(config.max_batch_items, 5);
        assert!(!config.record_timeout_enabled());
        assert!(config.enable_publish);
        assert_eq!(config.max_text_chars, DEFAULT_MAX_TEXT_CHARS);
    }

    #[test]
    fn test_apply_toml_rejects_zero_batch() {
        let toml = TomlConfig {
            max_batch_items: Some(0),
            ..Default::default()
        };
        let mut config = AppConfig::default();
        assert!(config.apply_toml(&toml).is_err());
    }
}
