//! Sustained-transfer governor.
//!
//! Independent from the request governor: one large file uses a single request
//! slot but can still saturate the link, so bytes are budgeted separately.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::metrics;

/// Current bandwidth usage, for logging and status lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandwidthStats {
    /// Bytes still counted against the budget.
    pub bytes_in_window: u64,
    /// Configured ceiling.
    pub max_bytes_per_sec: u64,
    /// Whether the next transfer would have to wait.
    pub is_throttled: bool,
}

/// Returned by [`BandwidthGovernor::await_capacity`].
#[derive(Debug)]
pub struct BandwidthPermit {
    waited: Duration,
    _gate: Option<OwnedMutexGuard<()>>,
}

impl BandwidthPermit {
    /// Time spent waiting for capacity.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

#[derive(Debug, Clone)]
struct TransferRecord {
    at: Instant,
    bytes: u64,
}

/// Sliding-window bandwidth governor.
///
/// A transfer stays in the window for the longer of the window length and the
/// time its bytes need to drain at the ceiling rate, so one huge file keeps
/// throttling followers until it has been "paid off".
pub struct BandwidthGovernor {
    max_bytes_per_sec: u64,
    window: Duration,
    transfers: Mutex<VecDeque<TransferRecord>>,
    gate: Arc<Mutex<()>>,
}

impl BandwidthGovernor {
    /// Create a governor with a 1 second window.
    pub fn new(max_bytes_per_sec: u64) -> Self {
        Self::with_window(max_bytes_per_sec, Duration::from_secs(1))
    }

    /// Create a governor with a custom window length.
    pub fn with_window(max_bytes_per_sec: u64, window: Duration) -> Self {
        Self {
            max_bytes_per_sec: max_bytes_per_sec.max(1),
            window,
            transfers: Mutex::new(VecDeque::new()),
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn max_bytes_per_sec(&self) -> u64 {
        self.max_bytes_per_sec
    }

    /// Wait until the sustained rate is back under the ceiling.
    ///
    /// Callers that had to wait are released one at a time: the returned
    /// permit keeps later waiters parked until it is dropped, which should
    /// happen after the transfer's bytes were recorded.
    pub async fn await_capacity(&self) -> BandwidthPermit {
        let gate = Arc::clone(&self.gate).lock_owned().await;

        let wait = {
            let mut transfers = self.transfers.lock().await;
            let now = Instant::now();
            self.prune(&mut transfers, now);
            self.required_wait(&transfers, now)
        };

        if wait.is_zero() {
            return BandwidthPermit {
                waited: wait,
                _gate: None,
            };
        }

        debug!(
            wait_ms = wait.as_millis() as u64,
            max_bytes_per_sec = self.max_bytes_per_sec,
            "Bandwidth governor waiting"
        );
        metrics::GOVERNOR_WAIT_SECONDS
            .with_label_values(&["bandwidth"])
            .observe(wait.as_secs_f64());
        sleep(wait).await;
        BandwidthPermit {
            waited: wait,
            _gate: Some(gate),
        }
    }

    /// Register bytes consumed by a finished transfer.
    pub async fn record_transfer(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut transfers = self.transfers.lock().await;
        transfers.push_back(TransferRecord {
            at: Instant::now(),
            bytes,
        });
    }

    pub async fn stats(&self) -> BandwidthStats {
        let mut transfers = self.transfers.lock().await;
        let now = Instant::now();
        self.prune(&mut transfers, now);
        BandwidthStats {
            bytes_in_window: transfers.iter().map(|t| t.bytes).sum(),
            max_bytes_per_sec: self.max_bytes_per_sec,
            is_throttled: !self.required_wait(&transfers, now).is_zero(),
        }
    }

    /// Forget all recorded transfers.
    pub async fn reset(&self) {
        self.transfers.lock().await.clear();
    }

    fn drain_time(&self, bytes: u64) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.max_bytes_per_sec as f64)
    }

    fn prune(&self, transfers: &mut VecDeque<TransferRecord>, now: Instant) {
        let window = self.window;
        transfers.retain(|t| now.saturating_duration_since(t.at) < window.max(self.drain_time(t.bytes)));
    }

    fn required_wait(&self, transfers: &VecDeque<TransferRecord>, now: Instant) -> Duration {
        let total: u64 = transfers.iter().map(|t| t.bytes).sum();
        let allowed = (self.max_bytes_per_sec as f64 * self.window.as_secs_f64()) as u64;
        if total <= allowed {
            return Duration::ZERO;
        }
        let Some(earliest) = transfers.iter().map(|t| t.at).min() else {
            return Duration::ZERO;
        };
        self.drain_time(total)
            .saturating_sub(now.saturating_duration_since(earliest))
    }
}
