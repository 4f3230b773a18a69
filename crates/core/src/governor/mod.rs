//! Outbound pacing: request-rate and bandwidth governors.
//!
//! Both governors are explicit objects constructed once per process and passed
//! by `Arc` to every fetch site; there is no hidden global limiter state.
//! Budgets are process-local, two processes hitting the same origin do not
//! share them.

mod bandwidth;
mod pool;
mod profile;
mod rate;

pub use bandwidth::{BandwidthGovernor, BandwidthPermit, BandwidthStats};
pub use pool::{origin_of, GovernorPool};
pub use profile::{mbps_to_bytes_per_sec, GovernorProfile, RateLimits, RetryPolicy};
pub use rate::{RateGovernor, RateGovernorStatus};
