//! Per-client request counters.
//!
//! Counters are keyed by (site, ip) and tagged with the wall-clock
//! minute-of-hour they were opened in. A counter from an earlier minute reads
//! as zero. The housekeeper clears the whole table every interval, so a count
//! really measures "requests since the last clear within this minute"; this is
//! a coarse fixed-window limiter, not a token bucket.

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use super::key::SiteIpKey;
use crate::site::SiteConfig;

/// The counter bucket a timestamp falls into: its minute of the hour.
pub fn minute_bucket(now: DateTime<Utc>) -> u32 {
    now.minute()
}

#[derive(Debug, Clone, Copy)]
struct MinuteCounter {
    bucket: u32,
    count: u64,
}

impl MinuteCounter {
    fn new(bucket: u32) -> Self {
        Self { bucket, count: 0 }
    }

    /// Count one request in `bucket` and return the new total.
    fn hit(&mut self, bucket: u32) -> u64 {
        if self.bucket != bucket {
            self.bucket = bucket;
            self.count = 0;
        }
        self.count += 1;
        self.count
    }

    fn current(&self, bucket: u32) -> u64 {
        if self.bucket == bucket {
            self.count
        } else {
            0
        }
    }
}

/// The per-client limiter.
///
/// The increment and the limit comparison for one key happen under that key's
/// shard lock, so concurrent requests from the same client are serialized.
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: DashMap<SiteIpKey, MinuteCounter>,
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request and decide whether it is within the site's per-IP limit.
    ///
    /// Returns `false` when the post-increment count exceeds
    /// `max_requests_per_ip`.
    pub fn admit(&self, site: &SiteConfig, ip: &str, now: DateTime<Utc>) -> bool {
        let bucket = minute_bucket(now);
        let key = SiteIpKey::new(&site.name, ip);

        let count = self
            .counters
            .entry(key)
            .or_insert_with(|| MinuteCounter::new(bucket))
            .hit(bucket);

        trace!(site = %site.name, ip = %ip, count, limit = site.max_requests_per_ip, "Counted request");

        let within_limit = count <= site.max_requests_per_ip;
        if !within_limit {
            debug!(
                site = %site.name,
                ip = %ip,
                count,
                limit = site.max_requests_per_ip,
                "Per-IP rate limit exceeded"
            );
        }
        within_limit
    }

    /// The current count for a client, zero if its bucket is stale.
    pub fn count(&self, site: &str, ip: &str, now: DateTime<Utc>) -> u64 {
        self.counters
            .get(&SiteIpKey::new(site, ip))
            .map(|counter| counter.current(minute_bucket(now)))
            .unwrap_or(0)
    }

    /// Drop every counter. Returns the number dropped.
    pub fn clear(&self) -> usize {
        let before = self.counters.len();
        self.counters.clear();
        before
    }

    /// Drop the counters belonging to one site. Returns the number dropped.
    pub fn reset_site(&self, site: &str) -> usize {
        let before = self.counters.len();
        self.counters.retain(|key, _| !key.is_site(site));
        before.saturating_sub(self.counters.len())
    }

    /// Number of live counters.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 5).unwrap()
    }

    fn site(limit: u64) -> SiteConfig {
        SiteConfig {
            max_requests_per_ip: limit,
            ..SiteConfig::new("example.com")
        }
    }

    #[test]
    fn test_minute_bucket() {
        assert_eq!(minute_bucket(t0()), 15);
        assert_eq!(minute_bucket(t0() + Duration::hours(1)), 15);
    }

    #[test]
    fn test_admit_until_limit() {
        let limiter = RateLimiter::new();
        let site = site(3);

        for _ in 0..3 {
            assert!(limiter.admit(&site, "1.2.3.4", t0()));
        }
        assert!(!limiter.admit(&site, "1.2.3.4", t0()));
        assert_eq!(limiter.count("example.com", "1.2.3.4", t0()), 4);
    }

    #[test]
    fn test_clients_counted_separately() {
        let limiter = RateLimiter::new();
        let site = site(1);

        assert!(limiter.admit(&site, "1.1.1.1", t0()));
        assert!(limiter.admit(&site, "2.2.2.2", t0()));
        assert!(!limiter.admit(&site, "1.1.1.1", t0()));
        assert_eq!(limiter.counter_count(), 2);
    }

    #[test]
    fn test_new_minute_starts_from_zero() {
        let limiter = RateLimiter::new();
        let site = site(1);

        assert!(limiter.admit(&site, "1.1.1.1", t0()));
        assert!(!limiter.admit(&site, "1.1.1.1", t0()));

        let next_minute = t0() + Duration::seconds(60);
        assert_eq!(limiter.count("example.com", "1.1.1.1", next_minute), 0);
        assert!(limiter.admit(&site, "1.1.1.1", next_minute));
    }

    #[test]
    fn test_clear_and_reset_site() {
        let limiter = RateLimiter::new();
        let a = site(10);
        let b = SiteConfig::new("other.com");

        limiter.admit(&a, "1.1.1.1", t0());
        limiter.admit(&a, "2.2.2.2", t0());
        limiter.admit(&b, "1.1.1.1", t0());

        assert_eq!(limiter.reset_site("example.com"), 2);
        assert_eq!(limiter.counter_count(), 1);
        assert_eq!(limiter.clear(), 1);
        assert_eq!(limiter.counter_count(), 0);
    }

    #[test]
    fn test_concurrent_admits_are_counted_exactly() {
        let limiter = Arc::new(RateLimiter::new());
        let site = Arc::new(site(100));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                let site = site.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.admit(&site, "5.5.5.5", t0()))
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 100);
        assert_eq!(limiter.count("example.com", "5.5.5.5", t0()), 200);
    }
}
