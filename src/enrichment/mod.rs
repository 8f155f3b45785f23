//! Best-effort enrichment of public IPv4 addresses
//!
//! Two independent collaborators feed an [`Enrichment`]:
//! - reverse DNS for the domain name
//! - a GeoLite2 City database for country, subdivision and city
//!
//! Either one may fail without affecting the other; failures collapse to
//! "Unknown" and never reach the caller.

mod geo;
mod hostname;

pub use geo::{GeoLookup, GeoRecord, MaxMindGeoLookup};
pub use hostname::{DnsHostnameLookup, HostnameLookup};

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Placeholder for any attribute that could not be resolved
pub const UNKNOWN: &str = "Unknown";

/// Attributes attached to a public machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub domain: String,
    pub country: String,
    pub subdivision: String,
    pub city: String,
}

impl Default for Enrichment {
    fn default() -> Self {
        Self {
            domain: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
            subdivision: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
        }
    }
}

impl Enrichment {
    fn apply_geo(&mut self, record: GeoRecord) {
        if let Some(country) = record.country_code {
            self.country = country;
        }
        if let Some(subdivision) = record.subdivision_code {
            self.subdivision = subdivision;
        }
        if let Some(city) = record.city_name {
            self.city = city;
        }
    }
}

/// Resolves hostname and geolocation for public machines
pub struct EnrichmentResolver {
    hostnames: Option<Arc<dyn HostnameLookup>>,
    geo: Mutex<Option<Arc<dyn GeoLookup>>>,
}

impl EnrichmentResolver {
    /// Create a resolver; `None` disables the corresponding lookup
    pub fn new(
        hostnames: Option<Arc<dyn HostnameLookup>>,
        geo: Option<Arc<dyn GeoLookup>>,
    ) -> Self {
        Self {
            hostnames,
            geo: Mutex::new(geo),
        }
    }

    /// Resolver that performs no lookups at all
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Enrich an IPv4 address string
    ///
    /// Never fails. Hostname and geolocation are looked up independently and
    /// whichever fails leaves its fields at "Unknown".
    pub async fn enrich(&self, ipv4: &str) -> Enrichment {
        let mut enrichment = Enrichment::default();

        let ip: Ipv4Addr = match ipv4.parse() {
            Ok(ip) => ip,
            Err(e) => {
                tracing::debug!("Cannot enrich {}: not a valid IPv4 address ({})", ipv4, e);
                return enrichment;
            }
        };

        if let Some(hostnames) = &self.hostnames {
            match hostnames.reverse_lookup(ip).await {
                Ok(domain) => enrichment.domain = domain,
                Err(e) => tracing::debug!("Can't resolve host name {}: {}", ipv4, e),
            }
        }

        // Clone out of the lock so the lookup itself runs unlocked
        let geo = self.geo_handle().clone();
        if let Some(geo) = geo {
            match geo.lookup(ip) {
                Ok(record) => enrichment.apply_geo(record),
                Err(e) => tracing::debug!("No geolocation for {}: {}", ipv4, e),
            }
        }

        enrichment
    }

    /// Release the geolocation database. Later lookups leave geo fields unknown.
    pub fn close(&self) {
        if self.geo_handle().take().is_some() {
            tracing::info!("Geolocation database closed");
        }
    }

    /// The guarded value is only ever swapped whole, so a poisoned lock still
    /// holds a usable handle
    fn geo_handle(&self) -> MutexGuard<'_, Option<Arc<dyn GeoLookup>>> {
        self.geo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
