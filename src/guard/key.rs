//! Composite (site, client address) key.

use std::fmt;

/// A key that identifies one client address on one site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteIpKey {
    /// The protected site
    pub site: String,
    /// The client address, as reported by the HTTP layer
    pub ip: String,
}

impl SiteIpKey {
    pub fn new(site: &str, ip: &str) -> Self {
        Self {
            site: site.to_string(),
            ip: ip.to_string(),
        }
    }

    /// Whether this key belongs to `site`.
    pub fn is_site(&self, site: &str) -> bool {
        self.site == site
    }
}

impl fmt::Display for SiteIpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.site, self.ip)
    }
}
