//! Registry of protected sites.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::config::SiteConfig;
use crate::error::{Result, StormError};

/// Read-mostly store of site configurations keyed by site name.
///
/// Lookups hand out `Arc` snapshots so a request keeps a consistent view even
/// if an administrator edits the site concurrently.
#[derive(Debug, Default)]
pub struct SiteRegistry {
    sites: RwLock<HashMap<String, Arc<SiteConfig>>>,
}

impl SiteRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with `sites`.
    pub fn with_sites(sites: impl IntoIterator<Item = SiteConfig>) -> Self {
        let registry = Self::new();
        for site in sites {
            registry.upsert(site);
        }
        registry
    }

    /// Look up a site.
    pub fn get(&self, site: &str) -> Result<Arc<SiteConfig>> {
        self.sites
            .read()
            .get(site)
            .cloned()
            .ok_or_else(|| StormError::UnknownSite(site.to_string()))
    }

    /// Insert or replace a site configuration.
    ///
    /// Returns `true` if the site was newly created.
    pub fn upsert(&self, config: SiteConfig) -> bool {
        let config = config.normalized();
        let name = config.name.clone();
        let created = self
            .sites
            .write()
            .insert(name.clone(), Arc::new(config))
            .is_none();

        if created {
            info!(site = %name, "Site registered");
        } else {
            debug!(site = %name, "Site configuration replaced");
        }
        created
    }

    /// Apply an in-place edit to an existing site.
    pub fn update<F>(&self, site: &str, edit: F) -> Result<Arc<SiteConfig>>
    where
        F: FnOnce(&mut SiteConfig),
    {
        let mut sites = self.sites.write();
        let entry = sites
            .get_mut(site)
            .ok_or_else(|| StormError::UnknownSite(site.to_string()))?;

        let mut edited = SiteConfig::clone(entry);
        edit(&mut edited);
        edited.name = site.to_string();
        *entry = Arc::new(edited.normalized());
        Ok(entry.clone())
    }

    /// All sites, ordered by name.
    pub fn list(&self) -> Vec<Arc<SiteConfig>> {
        let mut sites: Vec<_> = self.sites.read().values().cloned().collect();
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        sites
    }

    /// Number of registered sites.
    pub fn len(&self) -> usize {
        self.sites.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.read().is_empty()
    }
}
