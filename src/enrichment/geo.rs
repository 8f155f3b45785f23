// Geolocation lookups against a MaxMind GeoLite2 City database

use crate::error::{PciError, Result};
use maxminddb::{geoip2, Reader};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// Coarse location of an address; each field is optional in the database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoRecord {
    pub country_code: Option<String>,
    /// ISO code of the most specific subdivision
    pub subdivision_code: Option<String>,
    pub city_name: Option<String>,
}

/// Geolocation collaborator
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: Ipv4Addr) -> Result<GeoRecord>;
}

/// GeoLite2 City database loaded into memory
pub struct MaxMindGeoLookup {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeoLookup {
    /// Open the database file. Fails if the file is missing or corrupt.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Reader::open_readfile(path).map_err(|e| {
            PciError::Enrichment(format!(
                "Failed to open geolocation database {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::info!(
            "Geolocation database loaded: {} ({})",
            path.display(),
            reader.metadata.database_type
        );

        Ok(Self { reader })
    }
}

impl GeoLookup for MaxMindGeoLookup {
    fn lookup(&self, ip: Ipv4Addr) -> Result<GeoRecord> {
        let city: geoip2::City = self
            .reader
            .lookup(IpAddr::V4(ip))
            .map_err(|e| PciError::Enrichment(format!("Geolocation lookup failed: {}", e)))?;

        let country_code = city
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(str::to_string);

        let subdivision_code = city
            .subdivisions
            .as_ref()
            .and_then(|subs| subs.last())
            .and_then(|s| s.iso_code)
            .map(str::to_string);

        let city_name = city
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en"))
            .map(|name| name.to_string());

        Ok(GeoRecord {
            country_code,
            subdivision_code,
            city_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_database() {
        let temp_dir = TempDir::new().unwrap();
        let result = MaxMindGeoLookup::open(&temp_dir.path().join("GeoLite2-City.mmdb"));
        assert!(matches!(result, Err(PciError::Enrichment(_))));
    }

    #[test]
    fn test_open_corrupt_database() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("GeoLite2-City.mmdb");
        std::fs::write(&path, b"definitely not an mmdb file").unwrap();

        assert!(MaxMindGeoLookup::open(&path).is_err());
    }
}
