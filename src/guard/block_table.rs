//! Table of blocked client addresses.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::key::SiteIpKey;

/// A suspension of one client address on one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub site: String,
    pub ip: String,
    pub country_code: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` means the block lasts until explicitly removed
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlockRecord {
    /// A permanent block created at `now`.
    pub fn new(site: &str, ip: &str, now: DateTime<Utc>) -> Self {
        Self {
            site: site.to_string(),
            ip: ip.to_string(),
            country_code: None,
            reason: None,
            created_at: now,
            expires_at: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Expire the block `ttl` after its creation time.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.expires_at = ttl.map(|ttl| self.created_at + ttl);
        self
    }

    pub fn with_country(mut self, country_code: Option<String>) -> Self {
        self.country_code = country_code;
        self
    }

    /// Whether the block has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    fn key(&self) -> SiteIpKey {
        SiteIpKey::new(&self.site, &self.ip)
    }
}

/// Concurrent map of (site, ip) to its single active block record.
///
/// Every operation on a key runs under that key's shard lock, so an expiry
/// check and a concurrent upsert for the same pair cannot interleave.
#[derive(Debug, Default)]
pub struct BlockTable {
    records: DashMap<SiteIpKey, BlockRecord>,
}

impl BlockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `ip` is currently blocked on `site`.
    ///
    /// A record found expired is removed on the spot.
    pub fn is_blocked(&self, site: &str, ip: &str, now: DateTime<Utc>) -> bool {
        match self.records.entry(SiteIpKey::new(site, ip)) {
            Entry::Occupied(entry) if entry.get().is_expired(now) => {
                let (key, _) = entry.remove_entry();
                debug!(key = %key, "Evicted expired block");
                false
            }
            Entry::Occupied(_) => true,
            Entry::Vacant(_) => false,
        }
    }

    /// Insert a block, or refresh the existing one for the same pair.
    ///
    /// Returns `true` if a new record was created. Refreshing an active
    /// record keeps its creation time and replaces reason, country and expiry.
    pub fn block(&self, record: BlockRecord) -> bool {
        let now = record.created_at;
        match self.records.entry(record.key()) {
            Entry::Occupied(mut entry) => {
                let key = entry.key().clone();
                let existing = entry.get_mut();
                if existing.is_expired(now) {
                    *existing = record;
                    info!(key = %key, "IP blocked");
                    return true;
                }
                existing.reason = record.reason;
                existing.expires_at = record.expires_at;
                if record.country_code.is_some() {
                    existing.country_code = record.country_code;
                }
                debug!(
                    key = %key,
                    expires_at = ?existing.expires_at,
                    "Refreshed existing block"
                );
                false
            }
            Entry::Vacant(entry) => {
                info!(
                    key = %entry.key(),
                    reason = ?record.reason,
                    expires_at = ?record.expires_at,
                    "IP blocked"
                );
                entry.insert(record);
                true
            }
        }
    }

    /// Remove the block for a pair. Idempotent.
    ///
    /// Returns `true` if a record was removed.
    pub fn unblock(&self, site: &str, ip: &str) -> bool {
        let removed = self.records.remove(&SiteIpKey::new(site, ip)).is_some();
        if removed {
            info!(site = %site, ip = %ip, "IP unblocked");
        }
        removed
    }

    /// Active records for a site, ordered by address.
    pub fn list(&self, site: &str, now: DateTime<Utc>) -> Vec<BlockRecord> {
        let mut records: Vec<BlockRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().is_site(site) && !entry.is_expired(now))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.ip.cmp(&b.ip));
        records
    }

    /// Drop every expired record. Returns the number removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }

    /// Number of records held, including lapsed ones not yet evicted.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn active(
        table: &BlockTable,
        site: &str,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Option<BlockRecord> {
        table.list(site, now).into_iter().find(|record| record.ip == ip)
    }

    #[test]
    fn test_permanent_block() {
        let table = BlockTable::new();
        table.block(BlockRecord::new("s", "1.1.1.1", t0()).with_reason("manual"));

        assert!(table.is_blocked("s", "1.1.1.1", t0() + Duration::days(365)));
        assert!(!table.is_blocked("other", "1.1.1.1", t0()));
    }

    #[test]
    fn test_expired_block_is_evicted_on_lookup() {
        let table = BlockTable::new();
        table.block(BlockRecord::new("s", "1.1.1.1", t0()).with_ttl(Some(Duration::minutes(5))));

        assert!(table.is_blocked("s", "1.1.1.1", t0() + Duration::seconds(299)));
        assert_eq!(table.len(), 1);

        // Expiry instant itself counts as lapsed
        assert!(!table.is_blocked("s", "1.1.1.1", t0() + Duration::minutes(5)));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_block_twice_keeps_single_record() {
        let table = BlockTable::new();

        assert!(table.block(BlockRecord::new("s", "1.1.1.1", t0()).with_reason("first")));
        assert!(!table.block(
            BlockRecord::new("s", "1.1.1.1", t0() + Duration::seconds(10))
                .with_reason("second")
                .with_ttl(Some(Duration::minutes(30)))
        ));

        assert_eq!(table.len(), 1);
        let record = active(&table, "s", "1.1.1.1", t0()).unwrap();
        assert_eq!(record.reason.as_deref(), Some("second"));
        assert_eq!(record.created_at, t0());
        assert_eq!(
            record.expires_at,
            Some(t0() + Duration::seconds(10) + Duration::minutes(30))
        );
    }

    #[test]
    fn test_block_replaces_lapsed_record() {
        let table = BlockTable::new();
        table.block(BlockRecord::new("s", "1.1.1.1", t0()).with_ttl(Some(Duration::minutes(1))));

        let later = t0() + Duration::minutes(10);
        assert!(table.block(BlockRecord::new("s", "1.1.1.1", later)));
        assert_eq!(active(&table, "s", "1.1.1.1", later).unwrap().created_at, later);
    }

    #[test]
    fn test_unblock_is_idempotent() {
        let table = BlockTable::new();
        table.block(BlockRecord::new("s", "1.1.1.1", t0()));

        assert!(table.unblock("s", "1.1.1.1"));
        assert!(!table.unblock("s", "1.1.1.1"));
        assert!(!table.is_blocked("s", "1.1.1.1", t0()));
    }

    #[test]
    fn test_list_and_purge() {
        let table = BlockTable::new();
        table.block(BlockRecord::new("s", "2.2.2.2", t0()));
        table.block(BlockRecord::new("s", "1.1.1.1", t0()).with_ttl(Some(Duration::minutes(1))));
        table.block(BlockRecord::new("other", "3.3.3.3", t0()));

        let ips: Vec<_> = table.list("s", t0()).into_iter().map(|r| r.ip).collect();
        assert_eq!(ips, vec!["1.1.1.1", "2.2.2.2"]);

        let later = t0() + Duration::minutes(2);
        assert_eq!(table.list("s", later).len(), 1);
        assert_eq!(table.purge_expired(later), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_concurrent_blocks_produce_one_record() {
        let table = Arc::new(BlockTable::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                std::thread::spawn(move || {
                    table.block(
                        BlockRecord::new("s", "9.9.9.9", t0())
                            .with_reason(format!("worker {}", i))
                            .with_ttl(Some(Duration::minutes(30))),
                    )
                })
            })
            .collect();

        let created: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(created, 1);
        assert_eq!(table.len(), 1);
    }
}
