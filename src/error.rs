use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pci
#[derive(Error, Debug)]
pub enum PciError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Graph store cannot be reached (pool exhausted, file locked, store closed)
    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    /// A single malformed or truncated capture record
    #[error("Capture source error: {0}")]
    CaptureSource(String),

    /// The capture process stopped delivering packets for good
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Invalid combination of capture mode selectors
    #[error("Invalid capture mode: {0}")]
    CaptureMode(String),

    /// Hostname or geolocation lookup failed
    #[error("Enrichment failure: {0}")]
    Enrichment(String),

    /// Regex compilation errors
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PciError {
    /// Whether this error only costs the current packet (or capture record)
    /// and the ingestion loop may carry on with the next one.
    pub fn is_packet_recoverable(&self) -> bool {
        matches!(
            self,
            PciError::StoreUnavailable(_)
                | PciError::Database(_)
                | PciError::CaptureSource(_)
                | PciError::Enrichment(_)
                | PciError::Json { .. }
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for pci operations
pub type Result<T> = std::result::Result<T, PciError>;
