//! The admission engine: shared state, the per-request pipeline, periodic
//! housekeeping and traffic analytics.

mod analytics;
mod decision;
mod housekeeper;
mod pipeline;
mod state;
mod stats;

pub use analytics::{
    summarize, summary_window, CountryCount, RateLimitSummary, SiteSummary, TrafficSummary,
};
pub use decision::{Decision, DenyReason};
pub use housekeeper::{Housekeeper, HousekeeperHandle, HousekeepingReport};
pub use pipeline::{Monitor, MonitorSettings, ATTACK_BLOCK_REASON, RATE_LIMIT_BLOCK_REASON};
pub use state::MonitorState;
pub use stats::{MonitorStats, StatsSnapshot};
