//! Hot-path enforcement state: blocks, per-client counters and attack windows.
//!
//! Each structure is sharded by key (`dashmap`) so requests for different
//! sites or clients never contend on a single lock.

mod attack_detector;
mod block_table;
mod key;
mod rate_limiter;

pub use attack_detector::{AttackDetector, AttackWindowSnapshot, Detection, VOLUMETRIC_ATTACK};
pub use block_table::{BlockRecord, BlockTable};
pub use key::SiteIpKey;
pub use rate_limiter::{minute_bucket, RateLimiter};
