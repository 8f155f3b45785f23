// Reverse DNS lookups for public machines

use crate::error::{PciError, Result};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Hostname collaborator
#[async_trait]
pub trait HostnameLookup: Send + Sync {
    async fn reverse_lookup(&self, ip: Ipv4Addr) -> Result<String>;
}

/// PTR lookups through the system resolver
pub struct DnsHostnameLookup {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsHostnameLookup {
    /// Build a resolver from the system configuration, falling back to
    /// Google public DNS when it cannot be read
    pub fn new(timeout: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            tracing::warn!(
                "System resolver configuration unavailable ({}), using Google DNS",
                e
            );
            TokioAsyncResolver::tokio(ResolverConfig::google(), ResolverOpts::default())
        });

        Self { resolver, timeout }
    }
}

#[async_trait]
impl HostnameLookup for DnsHostnameLookup {
    async fn reverse_lookup(&self, ip: Ipv4Addr) -> Result<String> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.reverse_lookup(IpAddr::V4(ip)))
            .await
            .map_err(|_| {
                PciError::Enrichment(format!("Reverse lookup timed out after {:?}", self.timeout))
            })?
            .map_err(|e| PciError::Enrichment(format!("Reverse lookup failed: {}", e)))?;

        lookup
            .into_iter()
            .next()
            .map(|name| trim_root(&name.to_string()))
            .ok_or_else(|| PciError::Enrichment("No PTR record".to_string()))
    }
}

/// Strip the trailing root dot of a fully qualified name
fn trim_root(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}
