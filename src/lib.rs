//! Storm Blocker - Traffic Admission and DDoS Protection Engine
//!
//! This crate decides, for every incoming request to a protected site, whether
//! the request is admitted. It enforces operator-managed IP blocks, per-site
//! country rules and per-client rate limits, detects volumetric attacks per
//! site and blocks participating clients automatically. Decisions and attack
//! episodes are handed to pluggable log, geolocation and alert collaborators.

pub mod clock;
pub mod collab;
pub mod config;
pub mod error;
pub mod guard;
pub mod monitor;
pub mod records;
pub mod site;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StormConfig;
pub use error::{Result, StormError};
pub use monitor::{Decision, DenyReason, Monitor, MonitorSettings, MonitorState};
