//! Per-site attack detection.
//!
//! Each site has an observation window that is either idle or open since
//! `start`. While open, every request bumps the request count and the set of
//! distinct client addresses, and the average rate since `start` is compared
//! with the site's alert threshold. Elapsed time is measured in whole seconds;
//! during the first second no decision is made.
//!
//! The first time a window crosses the threshold it escalates and yields an
//! attack episode. Further over-threshold requests in the same window report
//! [`Detection::Ongoing`] without opening a new episode. Windows are returned
//! to idle by the housekeeper once they are older than the detection horizon.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::records::{AttackLogEntry, AttackStatus, Severity};
use crate::site::SiteConfig;

/// Attack type recorded for rate-based detections.
pub const VOLUMETRIC_ATTACK: &str = "DDoS";

/// Outcome of feeding one request to the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// The site is not under attack
    Normal,
    /// The window had already escalated and is still over threshold
    Ongoing { rate: f64 },
    /// The window crossed the threshold for the first time
    Escalated(AttackLogEntry),
}

#[derive(Debug, Default)]
struct AttackWindow {
    start: Option<DateTime<Utc>>,
    request_count: u64,
    unique_ips: HashSet<String>,
    escalated: bool,
}

impl AttackWindow {
    fn is_idle(&self) -> bool {
        self.start.is_none()
    }

    fn open(&mut self, now: DateTime<Utc>, ip: &str) {
        self.start = Some(now);
        self.request_count = 1;
        self.unique_ips.clear();
        self.unique_ips.insert(ip.to_string());
        self.escalated = false;
    }

    fn reset(&mut self) {
        *self = AttackWindow::default();
    }
}

/// Read-only view of a site's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttackWindowSnapshot {
    pub start: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub unique_ips: usize,
    pub escalated: bool,
}

/// Attack detector holding one window per site.
#[derive(Debug, Default)]
pub struct AttackDetector {
    windows: DashMap<String, AttackWindow>,
}

impl AttackDetector {
    /// Create a detector with no windows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request for `site` from `ip` and evaluate the window.
    pub fn observe(&self, site: &SiteConfig, ip: &str, now: DateTime<Utc>) -> Detection {
        let mut window = self
            .windows
            .entry(site.name.clone())
            .or_default();

        let Some(start) = window.start else {
            window.open(now, ip);
            debug!(site = %site.name, "Attack window opened");
            return Detection::Normal;
        };

        window.request_count += 1;
        if !window.unique_ips.contains(ip) {
            window.unique_ips.insert(ip.to_string());
        }

        let elapsed = (now - start).num_seconds();
        if elapsed <= 0 {
            return Detection::Normal;
        }

        let threshold = site.alert_threshold as f64;
        let rate = window.request_count as f64 / elapsed as f64;
        if rate <= threshold {
            return Detection::Normal;
        }

        if window.escalated {
            return Detection::Ongoing { rate };
        }
        window.escalated = true;

        let severity = if rate > threshold * 2.0 {
            Severity::High
        } else {
            Severity::Medium
        };

        warn!(
            site = %site.name,
            rate,
            threshold = site.alert_threshold,
            requests = window.request_count,
            unique_ips = window.unique_ips.len(),
            severity = %severity,
            "Attack detected"
        );

        Detection::Escalated(AttackLogEntry {
            site: site.name.clone(),
            start_time: start,
            end_time: None,
            attack_type: VOLUMETRIC_ATTACK.to_string(),
            severity,
            blocked_requests: window.request_count,
            unique_ips: window.unique_ips.len(),
            status: AttackStatus::Ongoing,
        })
    }

    /// Return every window opened more than `horizon` ago to idle.
    ///
    /// Returns the number of windows reset.
    pub fn reset_stale(&self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let mut reset = 0;
        for mut entry in self.windows.iter_mut() {
            let stale = entry.start.is_some_and(|start| now - start > horizon);
            if stale {
                debug!(site = %entry.key(), "Attack window reset after horizon");
                entry.reset();
                reset += 1;
            }
        }
        reset
    }

    /// Return one site's window to idle. Returns `true` if it was open.
    pub fn reset_site(&self, site: &str) -> bool {
        match self.windows.get_mut(site) {
            Some(mut window) if !window.is_idle() => {
                window.reset();
                true
            }
            _ => false,
        }
    }

    /// Current state of a site's window, `None` if the site was never seen.
    pub fn snapshot(&self, site: &str) -> Option<AttackWindowSnapshot> {
        self.windows.get(site).map(|window| AttackWindowSnapshot {
            start: window.start,
            request_count: window.request_count,
            unique_ips: window.unique_ips.len(),
            escalated: window.escalated,
        })
    }

    /// Number of sites with an open window.
    pub fn open_windows(&self) -> usize {
        self.windows.iter().filter(|w| !w.is_idle()).count()
    }
}
