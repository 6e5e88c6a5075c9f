//! External collaborators of the admission engine.
//!
//! The engine never talks to a database, a GeoIP database or a mail server
//! directly. It goes through these traits; the in-process implementations here
//! are what the binary and the tests use.

mod alert;
mod resolver;
mod store;

use std::sync::Arc;

pub use alert::{render_alert, Alerter, TracingAlerter};
pub use resolver::{CountryResolver, StaticResolver};
pub use store::{AttackQuery, LogStore, MemoryLogStore, StoredAttack, TimeRange};

#[cfg(test)]
pub use alert::MockAlerter;
#[cfg(test)]
pub use resolver::MockCountryResolver;
#[cfg(test)]
pub use store::MockLogStore;

/// The set of collaborators a monitor is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn CountryResolver>,
    pub store: Arc<dyn LogStore>,
    pub alerter: Arc<dyn Alerter>,
}

impl Collaborators {
    pub fn new(
        resolver: Arc<dyn CountryResolver>,
        store: Arc<dyn LogStore>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            resolver,
            store,
            alerter,
        }
    }

    /// Collaborators that keep everything in process: an empty country table,
    /// an in-memory log store and log-only alerts.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(StaticResolver::new()),
            Arc::new(MemoryLogStore::new()),
            Arc::new(TracingAlerter),
        )
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
