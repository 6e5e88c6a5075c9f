//! Engine activity counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters of engine activity.
#[derive(Debug, Default)]
pub struct MonitorStats {
    decisions: AtomicU64,
    admitted: AtomicU64,
    denied: AtomicU64,
    attacks_detected: AtomicU64,
    persistence_failures: AtomicU64,
    alert_failures: AtomicU64,
    resolver_fallbacks: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub decisions: u64,
    pub admitted: u64,
    pub denied: u64,
    pub attacks_detected: u64,
    pub persistence_failures: u64,
    pub alert_failures: u64,
    pub resolver_fallbacks: u64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_decision(&self, admitted: bool) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
        if admitted {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_attack(&self) {
        self.attacks_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_alert_failure(&self) {
        self.alert_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resolver_fallback(&self) {
        self.resolver_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            decisions: self.decisions.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            attacks_detected: self.attacks_detected.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            alert_failures: self.alert_failures.load(Ordering::Relaxed),
            resolver_fallbacks: self.resolver_fallbacks.load(Ordering::Relaxed),
        }
    }
}
