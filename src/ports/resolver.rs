//! Port for resolving host net addresses into IP sets.
//!
//! Resolution runs on announcement and before every scan; the resulting
//! addresses are collapsed into subnet strings by
//! [`crate::filters::subnets`].

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::{InfraError, Result};
use crate::filters::subnets::split_host_port;

/// Port for DNS resolution.
#[async_trait]
pub trait NetResolver: Send + Sync {
    /// Resolve the host part of a `host:port` net address.
    ///
    /// # Errors
    /// Returns an error if the address is malformed or resolution fails.
    async fn resolve(&self, net_address: &str) -> Result<Vec<IpAddr>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// DNS RESOLVER (Production)
// ═══════════════════════════════════════════════════════════════════════════════

/// Production resolver using the tokio host lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl DnsResolver {
    /// Create a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NetResolver for DnsResolver {
    async fn resolve(&self, net_address: &str) -> Result<Vec<IpAddr>> {
        let (host, port) = split_host_port(net_address).ok_or_else(|| {
            InfraError::Resolution(format!("malformed net address: {net_address}"))
        })?;

        // An IP literal needs no lookup.
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| InfraError::Resolution(format!("{host}: {e}")))?;
        let mut ips: Vec<IpAddr> = addrs.map(|sa| sa.ip()).collect();
        ips.dedup();
        if ips.is_empty() {
            return Err(InfraError::Resolution(format!("{host}: no addresses")).into());
        }
        Ok(ips)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literals_skip_dns() {
        let resolver = DnsResolver::new();
        let ips = resolver.resolve("1.2.3.4:9982").await.unwrap();
        assert_eq!(ips, vec!["1.2.3.4".parse::<IpAddr>().unwrap()]);

        let ips = resolver.resolve("[2001:db8::1]:9982").await.unwrap();
        assert_eq!(ips, vec!["2001:db8::1".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn malformed_addresses_are_rejected() {
        let resolver = DnsResolver::new();
        assert!(resolver.resolve("no-port-here").await.is_err());
    }
}
