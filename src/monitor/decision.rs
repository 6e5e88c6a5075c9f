//! The outcome of one admission decision.

use serde::Serialize;
use std::fmt;

use crate::records::TrafficStatus;

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DenyReason {
    #[serde(rename = "service-unavailable")]
    ServiceUnavailable,
    #[serde(rename = "maintenance")]
    Maintenance,
    #[serde(rename = "IP blocked")]
    IpBlocked,
    #[serde(rename = "Country blocked")]
    CountryBlocked,
    #[serde(rename = "Rate limit exceeded")]
    RateLimitExceeded,
    #[serde(rename = "Attack detected")]
    AttackDetected,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::ServiceUnavailable => "service-unavailable",
            DenyReason::Maintenance => "maintenance",
            DenyReason::IpBlocked => "IP blocked",
            DenyReason::CountryBlocked => "Country blocked",
            DenyReason::RateLimitExceeded => "Rate limit exceeded",
            DenyReason::AttackDetected => "Attack detected",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub admit: bool,
    pub status: TrafficStatus,
    pub reason: Option<DenyReason>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            admit: true,
            status: TrafficStatus::Allowed,
            reason: None,
        }
    }

    pub fn deny(status: TrafficStatus, reason: DenyReason) -> Self {
        Self {
            admit: false,
            status,
            reason: Some(reason),
        }
    }

    /// The reason text recorded in the traffic log.
    pub fn reason_text(&self) -> Option<String> {
        self.reason.map(|reason| reason.as_str().to_string())
    }
}
