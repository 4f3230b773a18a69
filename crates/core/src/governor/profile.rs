//! Operating profiles shared by the governors and the fetch-retry engine.
//!
//! A profile bundles every pacing number one upstream origin is treated with:
//! request ceilings, spacing, jitter, retry bounds and the sustained transfer
//! ceiling. The numbers below are the only place these constants live.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Pacing profile for one origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorProfile {
    /// Regular harvesting pace.
    #[default]
    Normal,
    /// Slow mode used to recover from upstream throttling.
    Gentle,
    /// Fixed low ceiling for catalogs with very strict published limits.
    Restricted,
}

/// Request-rate ceilings enforced by a [`super::RateGovernor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    /// Max requests inside any rolling 1 second window.
    pub max_per_second: u32,
    /// Max requests inside any rolling 60 second window.
    pub max_per_minute: u32,
    /// Minimum gap between two consecutive requests.
    pub min_spacing: Duration,
    /// Added on top of a window wait so the oldest entry has surely expired.
    pub window_buffer: Duration,
    /// Upper bound of the random delay added to every wait.
    pub jitter: Option<Duration>,
}

/// Retry bounds and delays applied by the fetch-retry engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff for retry 0; doubled for every further retry.
    pub backoff_base: Duration,
    /// Cap for transient backoff.
    pub backoff_max: Duration,
    /// Lowest wait after an HTTP 429.
    pub rate_limit_floor: Duration,
    /// Highest wait after an HTTP 429.
    pub rate_limit_ceiling: Duration,
    /// Fixed pause after every successful download.
    pub courtesy_pause: Duration,
    /// Random extra added to the courtesy pause.
    pub courtesy_jitter: Option<Duration>,
    /// Random extra added to every backoff.
    pub jitter: Option<Duration>,
}

impl GovernorProfile {
    /// Request ceilings for this profile.
    pub fn rate_limits(self) -> RateLimits {
        match self {
            GovernorProfile::Normal => RateLimits {
                max_per_second: 5,
                max_per_minute: 100,
                min_spacing: Duration::from_millis(200),
                window_buffer: Duration::from_millis(100),
                jitter: None,
            },
            GovernorProfile::Gentle => RateLimits {
                max_per_second: 1,
                max_per_minute: 6,
                min_spacing: Duration::from_secs(8),
                window_buffer: Duration::from_secs(1),
                jitter: Some(Duration::from_secs(3)),
            },
            GovernorProfile::Restricted => RateLimits {
                max_per_second: 1,
                max_per_minute: 3,
                min_spacing: Duration::from_secs(20),
                window_buffer: Duration::from_secs(1),
                jitter: Some(Duration::from_secs(2)),
            },
        }
    }

    /// Retry bounds for this profile.
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            GovernorProfile::Normal => RetryPolicy {
                max_retries: 3,
                backoff_base: Duration::from_secs(2),
                backoff_max: Duration::from_secs(60),
                rate_limit_floor: Duration::from_secs(5),
                rate_limit_ceiling: Duration::from_secs(60),
                courtesy_pause: Duration::from_millis(500),
                courtesy_jitter: None,
                jitter: None,
            },
            GovernorProfile::Gentle | GovernorProfile::Restricted => RetryPolicy {
                max_retries: 4,
                backoff_base: Duration::from_secs(5),
                backoff_max: Duration::from_secs(180),
                rate_limit_floor: Duration::from_secs(20),
                rate_limit_ceiling: Duration::from_secs(180),
                courtesy_pause: Duration::from_secs(2),
                courtesy_jitter: Some(Duration::from_secs(3)),
                jitter: Some(Duration::from_secs(3)),
            },
        }
    }

    /// Sustained transfer ceiling in bytes per second.
    pub fn bandwidth_bytes_per_sec(self) -> u64 {
        match self {
            GovernorProfile::Normal => mbps_to_bytes_per_sec(25.0),
            GovernorProfile::Gentle | GovernorProfile::Restricted => mbps_to_bytes_per_sec(10.0),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given retry index: `base * 2^retry`,
    /// capped at `backoff_max`, plus jitter when the profile asks for it.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        let backoff = self.backoff_base.saturating_mul(factor).min(self.backoff_max);
        backoff + sample_jitter(self.jitter)
    }

    /// Wait after an HTTP 429.
    ///
    /// Uses the server's `Retry-After` when it was parseable, exponential
    /// backoff otherwise, then clamps into `[floor, ceiling]`.
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>, retry: u32) -> Duration {
        let wait = retry_after.unwrap_or_else(|| self.backoff(retry));
        wait.max(self.rate_limit_floor).min(self.rate_limit_ceiling.max(self.rate_limit_floor))
    }

    /// Pause taken after a successful download.
    pub fn courtesy_delay(&self) -> Duration {
        self.courtesy_pause + sample_jitter(self.courtesy_jitter)
    }
}

/// Convert megabits per second into bytes per second.
pub fn mbps_to_bytes_per_sec(mbps: f64) -> u64 {
    (mbps * 1_000_000.0 / 8.0) as u64
}

/// Uniform random delay in `[0, max]`, or zero when no jitter is configured.
pub(crate) fn sample_jitter(max: Option<Duration>) -> Duration {
    match max {
        Some(max) if !max.is_zero() => {
            let millis = rand::rng().random_range(0..=max.as_millis() as u64);
            Duration::from_millis(millis)
        }
        _ => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(profile: GovernorProfile) -> RetryPolicy {
        RetryPolicy {
            jitter: None,
            courtesy_jitter: None,
            ..profile.retry_policy()
        }
    }

    #[test]
    fn test_profile_numbers() {
        let normal = GovernorProfile::Normal.rate_limits();
        assert_eq!(normal.max_per_second, 5);
        assert_eq!(normal.max_per_minute, 100);
        assert!(normal.jitter.is_none());

        let gentle = GovernorProfile::Gentle.rate_limits();
        assert!(gentle.max_per_minute < 10);
        assert!(gentle.min_spacing >= Duration::from_secs(2));
        assert!(gentle.jitter.is_some());

        let restricted = GovernorProfile::Restricted.rate_limits();
        assert!(restricted.max_per_minute <= 3);
        assert!(restricted.min_spacing >= Duration::from_secs(20));
    }

    #[test]
    fn test_gentle_retries_once_more_than_normal() {
        assert_eq!(GovernorProfile::Normal.retry_policy().max_retries, 3);
        assert_eq!(GovernorProfile::Gentle.retry_policy().max_retries, 4);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = no_jitter(GovernorProfile::Normal);
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limit_wait_respects_retry_after() {
        let policy = no_jitter(GovernorProfile::Normal);
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_secs(7)), 0),
            Duration::from_secs(7)
        );
        // Floor
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_secs(1)), 0),
            Duration::from_secs(5)
        );
        // Ceiling
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_secs(3600)), 0),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_gentle_rate_limit_floor() {
        let policy = no_jitter(GovernorProfile::Gentle);
        assert_eq!(policy.rate_limit_wait(None, 0), Duration::from_secs(20));
        assert_eq!(policy.rate_limit_wait(None, 3), Duration::from_secs(40));
    }

    #[test]
    fn test_courtesy_delay_ranges() {
        let normal = GovernorProfile::Normal.retry_policy();
        assert_eq!(normal.courtesy_delay(), Duration::from_millis(500));

        let gentle = GovernorProfile::Gentle.retry_policy();
        for _ in 0..20 {
            let delay = gentle.courtesy_delay();
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_bandwidth_ceiling() {
        assert_eq!(GovernorProfile::Normal.bandwidth_bytes_per_sec(), 3_125_000);
        assert_eq!(mbps_to_bytes_per_sec(8.0), 1_000_000);
    }

    #[test]
    fn test_profile_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            profile: GovernorProfile,
        }
        let parsed: Wrapper = toml::from_str(r#"profile = "restricted""#).unwrap();
        assert_eq!(parsed.profile, GovernorProfile::Restricted);
    }
}
