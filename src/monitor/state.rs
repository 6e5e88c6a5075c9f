//! Tables shared between the pipeline and background housekeeping.

use std::sync::Arc;

use crate::guard::{AttackDetector, BlockTable, RateLimiter};
use crate::site::{SiteConfig, SiteRegistry};

/// The shared, mutable state of the engine.
///
/// Cloning is cheap and every clone sees the same tables. One instance is
/// shared by the pipeline and the housekeeper.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    pub sites: Arc<SiteRegistry>,
    pub blocks: Arc<BlockTable>,
    pub limiter: Arc<RateLimiter>,
    pub detector: Arc<AttackDetector>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sites(sites: impl IntoIterator<Item = SiteConfig>) -> Self {
        Self {
            sites: Arc::new(SiteRegistry::with_sites(sites)),
            ..Self::default()
        }
    }
}
