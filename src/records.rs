//! Traffic and attack log records produced by the admission pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome recorded for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficStatus {
    Allowed,
    Blocked,
    RateLimited,
}

impl TrafficStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficStatus::Allowed => "allowed",
            TrafficStatus::Blocked => "blocked",
            TrafficStatus::RateLimited => "rate-limited",
        }
    }

    /// Whether this status counts as a denied request in analytics.
    pub fn is_denied(&self) -> bool {
        !matches!(self, TrafficStatus::Allowed)
    }
}

impl fmt::Display for TrafficStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One admission decision, as handed to the log store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficLogEntry {
    pub site: String,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
    pub country_code: Option<String>,
    pub path: Option<String>,
    pub status: TrafficStatus,
    pub reason: Option<String>,
}

/// Attack severity, relative to the site's alert threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => f.write_str("Medium"),
            Severity::High => f.write_str("High"),
        }
    }
}

/// Lifecycle of an attack episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackStatus {
    Ongoing,
    Mitigated,
}

impl fmt::Display for AttackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackStatus::Ongoing => f.write_str("ongoing"),
            AttackStatus::Mitigated => f.write_str("mitigated"),
        }
    }
}

/// Identifier assigned to an attack episode by the log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttackId(pub Uuid);

impl AttackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A confirmed attack episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackLogEntry {
    pub site: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub attack_type: String,
    pub severity: Severity,
    /// Requests observed in the window when the attack was confirmed
    pub blocked_requests: u64,
    /// Distinct client addresses observed in the window
    pub unique_ips: usize,
    pub status: AttackStatus,
}

impl AttackLogEntry {
    /// Close the episode.
    pub fn mitigate(&mut self, at: DateTime<Utc>) {
        self.status = AttackStatus::Mitigated;
        self.end_time = Some(at);
    }
}
