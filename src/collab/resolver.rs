//! IP to country resolution.

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use crate::error::{Result, StormError};

/// Maps a client address to an ISO 3166 alpha-2 country code.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CountryResolver: Send + Sync {
    /// Resolve `ip`. `Ok(None)` means the country is unknown.
    async fn resolve(&self, ip: &str) -> Result<Option<String>>;
}

/// Resolver backed by a fixed table of networks.
///
/// The most specific (longest prefix) matching network wins.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    networks: Vec<(IpNet, String)>,
}

impl StaticResolver {
    /// An empty table; every address resolves to unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `network -> country` pairs.
    ///
    /// Keys may be CIDR networks (`203.0.113.0/24`) or single addresses.
    pub fn from_table(table: &BTreeMap<String, String>) -> Result<Self> {
        let mut resolver = Self::new();
        for (network, country) in table {
            let net = parse_network(network).ok_or_else(|| {
                StormError::Config(format!("invalid network in country table: {}", network))
            })?;
            resolver.insert(net, country);
        }
        Ok(resolver)
    }

    /// Add a network to the table.
    pub fn insert(&mut self, network: IpNet, country: &str) {
        self.networks
            .push((network, country.trim().to_ascii_uppercase()));
        // Longest prefix first so the first hit is the most specific
        self.networks
            .sort_by(|a, b| b.0.prefix_len().cmp(&a.0.prefix_len()));
    }

    /// Synchronous lookup.
    pub fn lookup(&self, ip: IpAddr) -> Option<&str> {
        self.networks
            .iter()
            .find(|(net, _)| net.contains(&ip))
            .map(|(_, country)| country.as_str())
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

fn parse_network(value: &str) -> Option<IpNet> {
    let value = value.trim();
    value
        .parse::<IpNet>()
        .ok()
        .or_else(|| value.parse::<IpAddr>().ok().map(IpNet::from))
}

#[async_trait]
impl CountryResolver for StaticResolver {
    async fn resolve(&self, ip: &str) -> Result<Option<String>> {
        let Ok(addr) = ip.trim().parse::<IpAddr>() else {
            trace!(ip = %ip, "Unparseable address, country unknown");
            return Ok(None);
        };
        Ok(self.lookup(addr).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let resolver = StaticResolver::from_table(&table(&[
            ("10.0.0.0/8", "us"),
            ("10.1.0.0/16", "DE"),
            ("10.1.2.3", "FR"),
        ]))
        .unwrap();

        assert_eq!(resolver.resolve("10.9.9.9").await.unwrap().as_deref(), Some("US"));
        assert_eq!(resolver.resolve("10.1.9.9").await.unwrap().as_deref(), Some("DE"));
        assert_eq!(resolver.resolve("10.1.2.3").await.unwrap().as_deref(), Some("FR"));
        assert_eq!(resolver.resolve("192.168.0.1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ipv6_and_garbage() {
        let resolver = StaticResolver::from_table(&table(&[("2001:db8::/32", "NL")])).unwrap();

        assert_eq!(resolver.resolve("2001:db8::1").await.unwrap().as_deref(), Some("NL"));
        assert_eq!(resolver.resolve("not-an-ip").await.unwrap(), None);
    }

    #[test]
    fn test_invalid_table_entry() {
        let err = StaticResolver::from_table(&table(&[("10.0.0.0/99", "US")])).unwrap_err();
        assert!(matches!(err, StormError::Config(_)));
    }
}
