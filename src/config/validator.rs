use crate::config::{parse_duration, Config};
use crate::error::{PciError, Result, ValidationError};

/// Number of tshark fields making up a packet record
const PACKET_FIELDS: usize = 5;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_store(config, &mut errors);
        Self::validate_capture(config, &mut errors);
        Self::validate_enrichment(config, &mut errors);
        Self::validate_logging(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PciError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_store(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.store.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "store.path",
                "Store path cannot be empty",
            ));
        }

        if config.store.pool_size == 0 {
            errors.push(ValidationError::new(
                "store.pool_size",
                "Pool size must be greater than 0",
            ));
        }

        Self::validate_duration("store.connect_timeout", &config.store.connect_timeout, errors);
    }

    fn validate_capture(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.capture.tshark_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "capture.tshark_path",
                "tshark path cannot be empty",
            ));
        }

        Self::validate_duration("capture.poll_interval", &config.capture.poll_interval, errors);

        let fields = &config.capture.fields;
        if fields.len() != PACKET_FIELDS {
            errors.push(ValidationError::new(
                "capture.fields",
                format!(
                    "Expected {} fields (source, destination, protocol, length, info), got {}",
                    PACKET_FIELDS,
                    fields.len()
                ),
            ));
        }
        if fields.iter().any(|f| f.trim().is_empty()) {
            errors.push(ValidationError::new(
                "capture.fields",
                "Field names cannot be empty",
            ));
        }

        let ring = &config.capture.ring;
        if ring.file_size_kb == 0 {
            errors.push(ValidationError::new(
                "capture.ring.file_size_kb",
                "Ring file size must be greater than 0",
            ));
        }
        if ring.files == 0 {
            errors.push(ValidationError::new(
                "capture.ring.files",
                "Ring file count must be greater than 0",
            ));
        }
        if ring.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "capture.ring.path",
                "Ring file path cannot be empty",
            ));
        }
    }

    fn validate_enrichment(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.enrichment.geoip_db.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "enrichment.geoip_db",
                "GeoIP database path cannot be empty",
            ));
        }

        Self::validate_duration("enrichment.dns_timeout", &config.enrichment.dns_timeout, errors);
    }

    fn validate_logging(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.logging.filter.trim().is_empty() {
            errors.push(ValidationError::new(
                "logging.filter",
                "Logging filter cannot be empty",
            ));
        }
    }

    fn validate_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        match parse_duration(value) {
            Some(d) if !d.is_zero() => {}
            Some(_) => errors.push(ValidationError::new(path, "Duration must be non-zero")),
            None => errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            )),
        }
    }
}
