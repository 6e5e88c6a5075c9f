//! Persistence of traffic and attack logs.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::records::{AttackId, AttackLogEntry, AttackStatus, Severity, TrafficLogEntry};

/// Half-open time range `[start, end)`. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Every timestamp.
    pub fn all() -> Self {
        Self::default()
    }

    /// The `window` leading up to `now`.
    pub fn last(window: Duration, now: DateTime<Utc>) -> Self {
        Self {
            start: Some(now - window),
            end: None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }
}

/// Filter for attack log queries. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttackQuery {
    pub site: Option<String>,
    pub status: Option<AttackStatus>,
    pub severity: Option<Severity>,
}

impl AttackQuery {
    pub fn for_site(site: impl Into<String>) -> Self {
        Self {
            site: Some(site.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AttackStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn matches(&self, entry: &AttackLogEntry) -> bool {
        self.site.as_deref().map_or(true, |site| entry.site == site)
            && self.status.map_or(true, |status| entry.status == status)
            && self.severity.map_or(true, |severity| entry.severity == severity)
    }
}

/// An attack entry together with the id the store assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAttack {
    pub id: AttackId,
    #[serde(flatten)]
    pub entry: AttackLogEntry,
}

/// Durable log of admission decisions and attack episodes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append one traffic entry.
    async fn persist_traffic(&self, entry: TrafficLogEntry) -> Result<()>;

    /// Append an attack episode and return its id.
    async fn persist_attack(&self, entry: AttackLogEntry) -> Result<AttackId>;

    /// Close an episode. Returns `false` if no episode has that id.
    async fn mark_mitigated(&self, id: AttackId, end_time: DateTime<Utc>) -> Result<bool>;

    /// Traffic entries for `site` inside `range`, oldest first.
    async fn traffic_logs(&self, site: &str, range: TimeRange) -> Result<Vec<TrafficLogEntry>>;

    /// Attack episodes matching `query`, newest first.
    async fn attack_logs(&self, query: AttackQuery) -> Result<Vec<StoredAttack>>;
}

const DEFAULT_TRAFFIC_RETENTION: usize = 100_000;

/// In-process log store.
///
/// Traffic entries are kept in a bounded ring; the oldest entries are dropped
/// once `retention` is reached. Attack episodes are kept indefinitely.
#[derive(Debug)]
pub struct MemoryLogStore {
    traffic: RwLock<VecDeque<TrafficLogEntry>>,
    attacks: RwLock<Vec<StoredAttack>>,
    retention: usize,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_TRAFFIC_RETENTION)
    }
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            traffic: RwLock::new(VecDeque::new()),
            attacks: RwLock::new(Vec::new()),
            retention: retention.max(1),
        }
    }

    /// Every retained traffic entry, oldest first.
    pub fn traffic(&self) -> Vec<TrafficLogEntry> {
        self.traffic.read().iter().cloned().collect()
    }

    /// Every attack episode, in insertion order.
    pub fn attacks(&self) -> Vec<StoredAttack> {
        self.attacks.read().clone()
    }

    pub fn traffic_len(&self) -> usize {
        self.traffic.read().len()
    }

    pub fn attack_count(&self) -> usize {
        self.attacks.read().len()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn persist_traffic(&self, entry: TrafficLogEntry) -> Result<()> {
        let mut traffic = self.traffic.write();
        if traffic.len() >= self.retention {
            traffic.pop_front();
        }
        traffic.push_back(entry);
        Ok(())
    }

    async fn persist_attack(&self, entry: AttackLogEntry) -> Result<AttackId> {
        let id = AttackId::new();
        debug!(site = %entry.site, id = %id, "Stored attack episode");
        self.attacks.write().push(StoredAttack { id, entry });
        Ok(id)
    }

    async fn mark_mitigated(&self, id: AttackId, end_time: DateTime<Utc>) -> Result<bool> {
        let mut attacks = self.attacks.write();
        match attacks.iter_mut().find(|stored| stored.id == id) {
            Some(stored) => {
                stored.entry.mitigate(end_time);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn traffic_logs(&self, site: &str, range: TimeRange) -> Result<Vec<TrafficLogEntry>> {
        Ok(self
            .traffic
            .read()
            .iter()
            .filter(|entry| entry.site == site && range.contains(entry.timestamp))
            .cloned()
            .collect())
    }

    async fn attack_logs(&self, query: AttackQuery) -> Result<Vec<StoredAttack>> {
        let mut matching: Vec<StoredAttack> = self
            .attacks
            .read()
            .iter()
            .filter(|stored| query.matches(&stored.entry))
            .cloned()
            .collect();
        // Latest insertion first among equal start times
        matching.reverse();
        matching.sort_by(|a, b| b.entry.start_time.cmp(&a.entry.start_time));
        Ok(matching)
    }
}
