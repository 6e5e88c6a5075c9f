//! Recent-traffic summaries for dashboards.

use chrono::Duration;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::records::TrafficLogEntry;
use crate::site::SiteConfig;

/// How far back a summary looks.
pub fn summary_window() -> Duration {
    Duration::minutes(5)
}

const TOP_COUNTRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryCount {
    pub country_code: String,
    pub requests: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSummary {
    pub per_ip: u64,
    pub per_minute: u64,
}

/// Activity of one site over the summary window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficSummary {
    pub site: String,
    pub current_traffic: usize,
    /// Blocked plus rate-limited requests
    pub blocked: usize,
    pub unique_ips: usize,
    pub top_countries: Vec<CountryCount>,
    pub service_active: bool,
    pub maintenance_mode: bool,
    pub under_attack: bool,
    pub rate_limits: RateLimitSummary,
}

/// Summary entry of a multi-site report; a failing site carries its error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SiteSummary {
    Ok(TrafficSummary),
    Error { error: String },
}

/// Build the summary of `logs`, which must already be limited to the window.
pub fn summarize(site: &SiteConfig, logs: &[TrafficLogEntry], under_attack: bool) -> TrafficSummary {
    let blocked = logs.iter().filter(|entry| entry.status.is_denied()).count();
    let unique_ips = logs
        .iter()
        .filter_map(|entry| entry.ip.as_deref())
        .collect::<HashSet<_>>()
        .len();

    let mut by_country: HashMap<&str, usize> = HashMap::new();
    for code in logs.iter().filter_map(|entry| entry.country_code.as_deref()) {
        *by_country.entry(code).or_default() += 1;
    }
    let mut top_countries: Vec<CountryCount> = by_country
        .into_iter()
        .map(|(code, requests)| CountryCount {
            country_code: code.to_string(),
            requests,
        })
        .collect();
    top_countries.sort_by(|a, b| {
        b.requests
            .cmp(&a.requests)
            .then_with(|| a.country_code.cmp(&b.country_code))
    });
    top_countries.truncate(TOP_COUNTRIES);

    TrafficSummary {
        site: site.name.clone(),
        current_traffic: logs.len(),
        blocked,
        unique_ips,
        top_countries,
        service_active: site.service_active,
        maintenance_mode: site.maintenance,
        under_attack,
        rate_limits: RateLimitSummary {
            per_ip: site.max_requests_per_ip,
            per_minute: site.max_requests_per_min,
        },
    }
}
