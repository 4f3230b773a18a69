//! Rolling-window request governor for one upstream origin.

use std::collections::VecDeque;

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use super::profile::{sample_jitter, GovernorProfile, RateLimits};
use crate::metrics;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Snapshot of a governor's current window usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateGovernorStatus {
    pub profile: GovernorProfile,
    pub requests_last_second: u32,
    pub requests_last_minute: u32,
    pub max_per_second: u32,
    pub max_per_minute: u32,
}

/// Paces every outbound request to one origin.
///
/// One instance is shared by all callers that talk to the same origin. The
/// request log lock is held while waiting, so concurrent callers queue up and
/// each one sees the timestamps recorded by the callers before it.
pub struct RateGovernor {
    origin: String,
    profile: GovernorProfile,
    limits: RateLimits,
    log: Mutex<VecDeque<Instant>>,
}

impl RateGovernor {
    /// Create a governor using the numbers of `profile`.
    pub fn new(origin: impl Into<String>, profile: GovernorProfile) -> Self {
        Self::with_limits(origin, profile, profile.rate_limits())
    }

    /// Create a governor with explicit limits.
    pub fn with_limits(origin: impl Into<String>, profile: GovernorProfile, limits: RateLimits) -> Self {
        Self {
            origin: origin.into(),
            profile,
            limits,
            log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn profile(&self) -> GovernorProfile {
        self.profile
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Wait until one more request may be issued, then record it.
    ///
    /// Returns the total time spent waiting.
    pub async fn await_slot(&self) -> Duration {
        let mut log = self.log.lock().await;
        let mut waited = Duration::ZERO;

        let now = Instant::now();
        prune(&mut log, now);
        if count_within(&log, now, SECOND) >= self.limits.max_per_second as usize {
            if let Some(oldest) = oldest_within(&log, now, SECOND) {
                let wait = (oldest + SECOND).saturating_duration_since(now)
                    + self.limits.window_buffer
                    + sample_jitter(self.limits.jitter);
                waited += self.pause(wait, "per-second ceiling").await;
            }
        }

        let now = Instant::now();
        prune(&mut log, now);
        if count_within(&log, now, MINUTE) >= self.limits.max_per_minute as usize {
            if let Some(oldest) = log.front().copied() {
                let wait = (oldest + MINUTE).saturating_duration_since(now)
                    + self.limits.window_buffer
                    + sample_jitter(self.limits.jitter);
                waited += self.pause(wait, "per-minute ceiling").await;
            }
        }

        let now = Instant::now();
        if let Some(last) = log.back().copied() {
            let since_last = now.saturating_duration_since(last);
            if since_last < self.limits.min_spacing {
                let wait = self.limits.min_spacing - since_last + sample_jitter(self.limits.jitter);
                waited += self.pause(wait, "request spacing").await;
            }
        }

        log.push_back(Instant::now());
        waited
    }

    /// Current window usage.
    pub async fn status(&self) -> RateGovernorStatus {
        let mut log = self.log.lock().await;
        let now = Instant::now();
        prune(&mut log, now);
        RateGovernorStatus {
            profile: self.profile,
            requests_last_second: count_within(&log, now, SECOND) as u32,
            requests_last_minute: count_within(&log, now, MINUTE) as u32,
            max_per_second: self.limits.max_per_second,
            max_per_minute: self.limits.max_per_minute,
        }
    }

    async fn pause(&self, wait: Duration, reason: &'static str) -> Duration {
        if wait.is_zero() {
            return wait;
        }
        debug!(
            origin = %self.origin,
            profile = ?self.profile,
            wait_ms = wait.as_millis() as u64,
            reason,
            "Rate governor waiting"
        );
        metrics::GOVERNOR_WAIT_SECONDS
            .with_label_values(&["rate"])
            .observe(wait.as_secs_f64());
        sleep(wait).await;
        wait
    }
}

/// Drop entries that left the longest (60s) window.
fn prune(log: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = log.front() {
        if now.saturating_duration_since(*front) >= MINUTE {
            log.pop_front();
        } else {
            break;
        }
    }
}

fn count_within(log: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    log.iter()
        .filter(|ts| now.saturating_duration_since(**ts) < window)
        .count()
}

fn oldest_within(log: &VecDeque<Instant>, now: Instant, window: Duration) -> Option<Instant> {
    log.iter()
        .copied()
        .find(|ts| now.saturating_duration_since(*ts) < window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limits(per_second: u32, per_minute: u32, spacing_ms: u64) -> RateLimits {
        RateLimits {
            max_per_second: per_second,
            max_per_minute: per_minute,
            min_spacing: Duration::from_millis(spacing_ms),
            window_buffer: Duration::from_millis(10),
            jitter: None,
        }
    }

    fn max_in_window(stamps: &[Instant], window: Duration) -> usize {
        stamps
            .iter()
            .map(|start| {
                stamps
                    .iter()
                    .filter(|ts| **ts >= *start && ts.duration_since(*start) < window)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_slot_is_immediate() {
        let governor = RateGovernor::new("example.org", GovernorProfile::Normal);
        let waited = governor.await_slot().await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_spacing_between_returns() {
        let governor = RateGovernor::with_limits("a", GovernorProfile::Normal, limits(100, 1000, 250));
        let mut stamps = Vec::new();
        for _ in 0..10 {
            governor.await_slot().await;
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_second_ceiling_holds() {
        let governor = RateGovernor::with_limits("a", GovernorProfile::Normal, limits(3, 1000, 0));
        let mut stamps = Vec::new();
        for _ in 0..12 {
            governor.await_slot().await;
            stamps.push(Instant::now());
        }
        assert!(max_in_window(&stamps, SECOND) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_ceiling_holds() {
        let governor = RateGovernor::with_limits("a", GovernorProfile::Normal, limits(10, 4, 0));
        let mut stamps = Vec::new();
        for _ in 0..9 {
            governor.await_slot().await;
            stamps.push(Instant::now());
        }
        assert!(max_in_window(&stamps, MINUTE) <= 4);
        // Fifth request had to wait for the first one to leave the minute window.
        assert!(stamps[4].duration_since(stamps[0]) >= MINUTE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_budget() {
        let governor = Arc::new(RateGovernor::with_limits(
            "shared",
            GovernorProfile::Normal,
            limits(2, 1000, 100),
        ));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let governor = Arc::clone(&governor);
            handles.push(tokio::spawn(async move {
                governor.await_slot().await;
                Instant::now()
            }));
        }
        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();
        assert!(max_in_window(&stamps, SECOND) <= 2);
        for pair in stamps.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restricted_profile_spacing() {
        let governor = RateGovernor::new("strict.example", GovernorProfile::Restricted);
        let start = Instant::now();
        governor.await_slot().await;
        governor.await_slot().await;
        assert!(Instant::now().duration_since(start) >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_window_usage() {
        let governor = RateGovernor::with_limits("a", GovernorProfile::Normal, limits(5, 100, 0));
        governor.await_slot().await;
        governor.await_slot().await;

        let status = governor.status().await;
        assert_eq!(status.requests_last_second, 2);
        assert_eq!(status.requests_last_minute, 2);
        assert_eq!(status.max_per_second, 5);

        tokio::time::advance(Duration::from_secs(61)).await;
        let status = governor.status().await;
        assert_eq!(status.requests_last_minute, 0);
    }
}
