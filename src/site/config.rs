//! Configuration of a single protected site.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Enforcement settings for one protected site.
///
/// Country sets are ISO 3166 alpha-2 codes. When `allowed_countries` is
/// non-empty it is authoritative and `blocked_countries` is not consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Unique site name
    pub name: String,

    /// Site-wide request budget per minute (reported, not enforced)
    #[serde(default = "default_max_requests_per_min")]
    pub max_requests_per_min: u64,

    /// Requests a single client address may make per housekeeping interval
    #[serde(default = "default_max_requests_per_ip")]
    pub max_requests_per_ip: u64,

    #[serde(default)]
    pub blocked_countries: BTreeSet<String>,

    #[serde(default)]
    pub allowed_countries: BTreeSet<String>,

    #[serde(default)]
    pub maintenance: bool,

    #[serde(default = "default_true")]
    pub service_active: bool,

    /// Notify the alerting collaborator when an attack is confirmed
    #[serde(default = "default_true")]
    pub email_alerts: bool,

    /// Requests per second above which the site is considered under attack
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u64,
}

fn default_max_requests_per_min() -> u64 {
    1000
}

fn default_max_requests_per_ip() -> u64 {
    100
}

fn default_alert_threshold() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl SiteConfig {
    /// A site with the default limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_requests_per_min: default_max_requests_per_min(),
            max_requests_per_ip: default_max_requests_per_ip(),
            blocked_countries: BTreeSet::new(),
            allowed_countries: BTreeSet::new(),
            maintenance: false,
            service_active: true,
            email_alerts: true,
            alert_threshold: default_alert_threshold(),
        }
    }

    /// Whether a request from `country` passes the geo rule.
    ///
    /// An unresolved country always passes.
    pub fn country_permitted(&self, country: Option<&str>) -> bool {
        let Some(country) = country else {
            return true;
        };

        if !self.allowed_countries.is_empty() {
            return self.allowed_countries.contains(country);
        }

        !self.blocked_countries.contains(country)
    }

    /// Upper-case all country codes so lookups are case-insensitive.
    pub(crate) fn normalized(mut self) -> Self {
        self.blocked_countries = normalize_codes(self.blocked_countries);
        self.allowed_countries = normalize_codes(self.allowed_countries);
        self
    }
}

fn normalize_codes(codes: BTreeSet<String>) -> BTreeSet<String> {
    codes
        .into_iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_defaults_from_yaml() {
        let config: SiteConfig = serde_yaml::from_str("name: example.com").unwrap();

        assert_eq!(config, SiteConfig::new("example.com"));
        assert_eq!(config.max_requests_per_ip, 100);
        assert_eq!(config.alert_threshold, 1000);
        assert!(config.service_active);
        assert!(config.email_alerts);
        assert!(!config.maintenance);
    }

    #[test]
    fn test_block_list_only() {
        let config = SiteConfig {
            blocked_countries: codes(&["RU", "CN"]),
            ..SiteConfig::new("example.com")
        };

        assert!(!config.country_permitted(Some("RU")));
        assert!(config.country_permitted(Some("US")));
        assert!(config.country_permitted(None));
    }

    #[test]
    fn test_allow_list_takes_precedence() {
        let config = SiteConfig {
            allowed_countries: codes(&["US"]),
            blocked_countries: codes(&["US", "DE"]),
            ..SiteConfig::new("example.com")
        };

        assert!(config.country_permitted(Some("US")));
        assert!(!config.country_permitted(Some("DE")));
        assert!(!config.country_permitted(Some("FR")));
        assert!(config.country_permitted(None));
    }

    #[test]
    fn test_normalized_codes() {
        let config = SiteConfig {
            blocked_countries: codes(&[" ru", "", "cn "]),
            ..SiteConfig::new("example.com")
        }
        .normalized();

        assert_eq!(config.blocked_countries, codes(&["CN", "RU"]));
    }
}
