//! Configuration management for pci
//!
//! Loads the TOML configuration, applies `PCI_*` environment overrides and
//! validates the result before anything is opened.

use crate::error::{PciError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub store: StoreConfig,
    pub capture: CaptureConfig,
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Graph store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file holding the graph
    pub path: PathBuf,
    pub pool_size: u32,
    /// How long to wait for a pooled connection before giving up
    pub connect_timeout: String,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// tshark binary, looked up on PATH when not absolute
    pub tshark_path: PathBuf,
    /// Idle wait on a live capture before logging that nothing arrived
    pub poll_interval: String,
    /// tshark field names for source, destination, protocol, length, info
    pub fields: Vec<String>,
    pub ring: RingConfig,
}

/// Ring buffer settings for continuous capture with file rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Size of each ring file in kB
    pub file_size_kb: u32,
    /// Number of files in the ring
    pub files: u32,
    /// Base path of the ring files
    pub path: PathBuf,
}

/// Enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// GeoLite2 City database
    pub geoip_db: PathBuf,
    pub resolve_hostnames: bool,
    pub dns_timeout: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing-subscriber filter directive, overridden by RUST_LOG
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "pci=info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PciError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PciError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Resolve the configuration to use.
    ///
    /// An explicit path must exist. Otherwise the default location is used
    /// when present, and built-in defaults when not.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(default_path) = Self::default_path() {
            if default_path.exists() {
                tracing::debug!("Using configuration at {:?}", default_path);
                return Self::load(&default_path);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PciError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| PciError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: PCI_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("PCI_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORE__PATH" => {
                self.store.path = PathBuf::from(value);
            }
            "CAPTURE__TSHARK_PATH" => {
                self.capture.tshark_path = PathBuf::from(value);
            }
            "ENRICHMENT__GEOIP_DB" => {
                self.enrichment.geoip_db = PathBuf::from(value);
            }
            "ENRICHMENT__RESOLVE_HOSTNAMES" => {
                self.enrichment.resolve_hostnames =
                    value.parse().map_err(|_| PciError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "LOGGING__FILTER" => {
                self.logging.filter = value.to_string();
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PciError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("pci").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let db_dir = PathBuf::from("./db");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
            },
            store: StoreConfig {
                path: db_dir.join("graph").join("pci.sqlite"),
                pool_size: 8,
                connect_timeout: "5s".to_string(),
            },
            capture: CaptureConfig {
                tshark_path: PathBuf::from("tshark"),
                poll_interval: "50s".to_string(),
                fields: vec![
                    "_ws.col.def_src".to_string(),
                    "_ws.col.def_dst".to_string(),
                    "_ws.col.protocol".to_string(),
                    "frame.len".to_string(),
                    "_ws.col.info".to_string(),
                ],
                ring: RingConfig {
                    file_size_kb: 4096,
                    files: 50,
                    path: db_dir.join("pcap").join("pci.pcapng"),
                },
            },
            enrichment: EnrichmentConfig {
                geoip_db: db_dir.join("geoip").join("GeoLite2-City.mmdb"),
                resolve_hostnames: true,
                dns_timeout: "2s".to_string(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

/// Parse a duration string ("500ms", "5s", "2m", "1h", or bare seconds)
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    // Check "ms" before "s" because "ms" ends with "s"
    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse().ok().map(Duration::from_secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = value.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        value.parse().ok().map(Duration::from_secs)
    }
}
