//! Configuration management for Storm Blocker.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{Result, StormError};
use crate::site::SiteConfig;

/// Prefix of environment overrides, e.g. `STORM__HOUSEKEEPING__INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "STORM";

/// Main configuration for the Storm Blocker service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StormConfig {
    /// Periodic maintenance settings
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,

    /// Automatic block durations
    #[serde(default)]
    pub enforcement: EnforcementConfig,

    /// Country resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Log store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Attack notification settings
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Protected sites
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

/// Housekeeping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    /// Seconds between housekeeping ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Age in seconds after which an attack window is returned to idle
    #[serde(default = "default_attack_window_secs")]
    pub attack_window_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            attack_window_secs: default_attack_window_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

fn default_attack_window_secs() -> u64 {
    300
}

/// Durations of the blocks the pipeline places on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    #[serde(default = "default_rate_limit_block_secs")]
    pub rate_limit_block_secs: u64,

    #[serde(default = "default_attack_block_secs")]
    pub attack_block_secs: u64,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            rate_limit_block_secs: default_rate_limit_block_secs(),
            attack_block_secs: default_attack_block_secs(),
        }
    }
}

fn default_rate_limit_block_secs() -> u64 {
    300
}

fn default_attack_block_secs() -> u64 {
    1800
}

/// Country resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound on a single lookup, in milliseconds
    #[serde(default = "default_resolver_timeout_ms")]
    pub timeout_ms: u64,

    /// CIDR network or single address to ISO country code
    #[serde(default)]
    pub networks: BTreeMap<String, String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_resolver_timeout_ms(),
            networks: BTreeMap::new(),
        }
    }
}

fn default_resolver_timeout_ms() -> u64 {
    250
}

/// Log store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Traffic entries kept in memory before the oldest are dropped
    #[serde(default = "default_max_traffic_entries")]
    pub max_traffic_entries: usize,

    /// Upper bound on a single write issued by the pipeline, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_traffic_entries: default_max_traffic_entries(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

fn default_max_traffic_entries() -> usize {
    100_000
}

fn default_write_timeout_ms() -> u64 {
    500
}

/// Alert delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Upper bound on delivering one notification, in milliseconds
    #[serde(default = "default_alert_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_alert_timeout_ms(),
        }
    }
}

fn default_alert_timeout_ms() -> u64 {
    2000
}

impl StormConfig {
    /// Load configuration from an optional YAML file plus `STORM__*`
    /// environment overrides, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        let config: StormConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: StormConfig =
            serde_yaml::from_str(contents).map_err(|e| StormError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.housekeeping.interval_secs == 0 {
            return Err(StormError::Config(
                "housekeeping.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.housekeeping.attack_window_secs == 0 {
            return Err(StormError::Config(
                "housekeeping.attack_window_secs must be greater than zero".to_string(),
            ));
        }
        if self.resolver.timeout_ms == 0 {
            return Err(StormError::Config(
                "resolver.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.write_timeout_ms == 0 || self.alerts.timeout_ms == 0 {
            return Err(StormError::Config(
                "store.write_timeout_ms and alerts.timeout_ms must be greater than zero"
                    .to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if site.name.trim().is_empty() {
                return Err(StormError::Config("site name must not be empty".to_string()));
            }
            if !seen.insert(site.name.as_str()) {
                return Err(StormError::Config(format!(
                    "duplicate site name: {}",
                    site.name
                )));
            }
        }
        Ok(())
    }

    pub fn housekeeping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.housekeeping.interval_secs)
    }

    pub fn attack_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.housekeeping.attack_window_secs as i64)
    }

    pub fn rate_limit_block(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.enforcement.rate_limit_block_secs as i64)
    }

    pub fn attack_block(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.enforcement.attack_block_secs as i64)
    }

    pub fn resolver_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.resolver.timeout_ms)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store.write_timeout_ms)
    }

    pub fn alert_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.alerts.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StormConfig::default();

        assert_eq!(config.housekeeping.interval_secs, 60);
        assert_eq!(config.attack_horizon(), chrono::Duration::minutes(5));
        assert_eq!(config.rate_limit_block(), chrono::Duration::minutes(5));
        assert_eq!(config.attack_block(), chrono::Duration::minutes(30));
        assert_eq!(config.resolver_timeout(), std::time::Duration::from_millis(250));
        assert_eq!(config.store_timeout(), std::time::Duration::from_millis(500));
        assert_eq!(config.alert_timeout(), std::time::Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let config = StormConfig::from_yaml(
            r#"
housekeeping:
  interval_secs: 30
resolver:
  networks:
    "203.0.113.0/24": JP
sites:
  - name: shop.example
    max_requests_per_ip: 3
    blocked_countries: [cn, RU]
  - name: blog.example
    maintenance: true
"#,
        )
        .unwrap();

        assert_eq!(config.housekeeping.interval_secs, 30);
        assert_eq!(config.housekeeping.attack_window_secs, 300);
        assert_eq!(config.resolver.networks["203.0.113.0/24"], "JP");
        assert_eq!(config.sites.len(), 2);

        let shop = &config.sites[0];
        assert_eq!(shop.max_requests_per_ip, 3);
        assert_eq!(shop.alert_threshold, 1000);
        assert!(shop.service_active);
        assert!(config.sites[1].maintenance);
    }

    #[test]
    fn test_rejects_duplicate_sites() {
        let err = StormConfig::from_yaml(
            r#"
sites:
  - name: a.example
  - name: a.example
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("duplicate site name"));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = StormConfig::from_yaml("housekeeping:\n  interval_secs: 0\n").unwrap_err();
        assert!(matches!(err, StormError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_collaborator_timeouts() {
        assert!(StormConfig::from_yaml("store:\n  write_timeout_ms: 0\n").is_err());
        assert!(StormConfig::from_yaml("alerts:\n  timeout_ms: 0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("storm-{}.yaml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "enforcement:\n  attack_block_secs: 60\nsites:\n  - name: x.example").unwrap();

        let config = StormConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.enforcement.attack_block_secs, 60);
        assert_eq!(config.enforcement.rate_limit_block_secs, 300);
        assert_eq!(config.sites[0].name, "x.example");
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("storm-does-not-exist.yaml");
        assert!(StormConfig::load(Some(&path)).is_err());
    }
}
