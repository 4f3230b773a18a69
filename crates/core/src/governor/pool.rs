//! Process-wide registry of governors, one rate governor per origin.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::bandwidth::BandwidthGovernor;
use super::profile::GovernorProfile;
use super::rate::{RateGovernor, RateGovernorStatus};
use crate::config::GovernorConfig;

/// Owns every governor of the process.
///
/// Built once at startup and shared by `Arc`; all workers that hit the same
/// origin get the same [`RateGovernor`], and all downloads share one
/// [`BandwidthGovernor`].
pub struct GovernorPool {
    default_profile: GovernorProfile,
    overrides: HashMap<String, GovernorProfile>,
    governors: RwLock<HashMap<String, Arc<RateGovernor>>>,
    bandwidth: Arc<BandwidthGovernor>,
}

impl GovernorPool {
    /// Create a pool.
    ///
    /// `overrides` maps an origin host to the profile it must use instead of
    /// the default one.
    pub fn new<I>(default_profile: GovernorProfile, overrides: I, max_bytes_per_sec: u64) -> Self
    where
        I: IntoIterator<Item = (String, GovernorProfile)>,
    {
        Self {
            default_profile,
            overrides: overrides
                .into_iter()
                .map(|(host, profile)| (host.to_lowercase(), profile))
                .collect(),
            governors: RwLock::new(HashMap::new()),
            bandwidth: Arc::new(BandwidthGovernor::new(max_bytes_per_sec)),
        }
    }

    /// Build the pool described by the `[governor]` config section.
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(
            config.profile,
            config
                .origins
                .iter()
                .map(|origin| (origin.host.clone(), origin.profile)),
            config.bandwidth_bytes_per_sec(),
        )
    }

    pub fn default_profile(&self) -> GovernorProfile {
        self.default_profile
    }

    /// Profile that applies to `host`.
    pub fn profile_for(&self, host: &str) -> GovernorProfile {
        self.overrides
            .get(&host.to_lowercase())
            .copied()
            .unwrap_or(self.default_profile)
    }

    /// Governor for `host`, created on first use.
    pub async fn for_origin(&self, host: &str) -> Arc<RateGovernor> {
        let key = host.to_lowercase();
        if let Some(governor) = self.governors.read().await.get(&key) {
            return Arc::clone(governor);
        }

        let mut governors = self.governors.write().await;
        let governor = governors.entry(key.clone()).or_insert_with(|| {
            let profile = self.profile_for(&key);
            debug!(origin = %key, profile = ?profile, "Creating rate governor");
            Arc::new(RateGovernor::new(key.clone(), profile))
        });
        Arc::clone(governor)
    }

    /// Shared bandwidth governor.
    pub fn bandwidth(&self) -> Arc<BandwidthGovernor> {
        Arc::clone(&self.bandwidth)
    }

    /// Status of every governor created so far.
    pub async fn all_status(&self) -> Vec<(String, RateGovernorStatus)> {
        let governors: Vec<(String, Arc<RateGovernor>)> = self
            .governors
            .read()
            .await
            .iter()
            .map(|(name, governor)| (name.clone(), Arc::clone(governor)))
            .collect();

        let mut statuses = Vec::with_capacity(governors.len());
        for (name, governor) in governors {
            statuses.push((name, governor.status().await));
        }
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }
}

/// Host part of a URL, lowercased.
pub fn origin_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.to_lowercase())
}
