//! Cache staleness detection.
//!
//! A full discovery is expensive, so a cached snapshot is validated against a
//! handful of cheap counters instead: the backbone policy version, the number of
//! backbone attachments, and per-region transit router and VPC counts.

use anyhow::Result;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::Cache;
use crate::cloud::CloudApi;

/// Cache namespace holding the last saved markers
pub const MARKERS_NAMESPACE: &str = "topology_markers";

/// Default number of regions sampled for counts
pub const DEFAULT_MARKER_REGION_LIMIT: usize = 5;

/// Markers never expire on their own; this only fills the record's TTL field.
const MARKERS_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Quick-check fingerprint of the topology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMarkers {
    #[serde(default)]
    pub policy_version: Option<u64>,
    /// 0 means "not observed"
    #[serde(default)]
    pub attachment_count: u64,
    /// region -> transit router count
    #[serde(default)]
    pub tgw_count: BTreeMap<String, u64>,
    /// region -> VPC count
    #[serde(default)]
    pub vpc_count: BTreeMap<String, u64>,
}

impl ChangeMarkers {
    /// Regions these markers carry counts for, sorted
    pub fn regions(&self) -> Vec<String> {
        self.tgw_count
            .keys()
            .chain(self.vpc_count.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// First difference between these (saved) markers and `current`
    ///
    /// A field only counts when both sides observed it, so a sub-call that
    /// failed on either side never reads as a change.
    pub fn diff(&self, current: &ChangeMarkers) -> Option<String> {
        if let (Some(saved), Some(now)) = (self.policy_version, current.policy_version)
            && saved != now
        {
            return Some(format!("Backbone policy changed: {} → {}", saved, now));
        }

        if self.attachment_count > 0
            && current.attachment_count > 0
            && self.attachment_count != current.attachment_count
        {
            return Some(format!(
                "Attachment count changed: {} → {}",
                self.attachment_count, current.attachment_count
            ));
        }

        for (region, count) in &current.tgw_count {
            if let Some(saved) = self.tgw_count.get(region)
                && saved != count
            {
                return Some(format!(
                    "Transit router count changed in {}: {} → {}",
                    region, saved, count
                ));
            }
        }

        for (region, count) in &current.vpc_count {
            if let Some(saved) = self.vpc_count.get(region)
                && saved != count
            {
                return Some(format!(
                    "VPC count changed in {}: {} → {}",
                    region, saved, count
                ));
            }
        }

        None
    }
}

/// Outcome of a staleness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleCheck {
    pub stale: bool,
    pub reason: String,
}

impl StaleCheck {
    fn stale(reason: impl Into<String>) -> Self {
        Self {
            stale: true,
            reason: reason.into(),
        }
    }

    fn fresh() -> Self {
        Self {
            stale: false,
            reason: "No changes detected".to_string(),
        }
    }
}

/// Checks whether a cached topology is likely out of date
pub struct StalenessChecker {
    api: Arc<dyn CloudApi>,
    cache: Cache,
    region_limit: usize,
}

impl StalenessChecker {
    pub fn new(api: Arc<dyn CloudApi>, cache: Cache, region_limit: usize) -> Self {
        Self {
            api,
            cache,
            region_limit,
        }
    }

    /// Fetch fresh markers for the first few `regions`
    ///
    /// Never fails: a sub-call error leaves its field unset.
    pub async fn get_current_markers(&self, regions: &[String]) -> ChangeMarkers {
        let mut markers = ChangeMarkers::default();

        match self.api.list_core_networks().await {
            Ok(core_networks) => {
                if let Some(core) = core_networks.first() {
                    let id = core.core_network_id.as_str();
                    let (policy, attachments) = tokio::join!(
                        self.api.get_core_network_policy(id),
                        self.api.list_attachments(id, None),
                    );
                    match policy {
                        Ok(policy) => markers.policy_version = policy.version_id,
                        Err(e) => debug!(error = %e, "policy version unavailable"),
                    }
                    match attachments {
                        Ok(page) => markers.attachment_count = page.items.len() as u64,
                        Err(e) => debug!(error = %e, "attachment count unavailable"),
                    }
                }
            }
            Err(e) => debug!(error = %e, "core networks unavailable"),
        }

        let counts = join_all(regions.iter().take(self.region_limit).map(|region| async move {
            let (tgws, vpcs) = tokio::join!(
                self.api.list_transit_gateways(region),
                self.api.list_vpcs(region),
            );
            (region, tgws.map(|t| t.len() as u64), vpcs.map(|v| v.len() as u64))
        }))
        .await;

        for (region, tgws, vpcs) in counts {
            match tgws {
                Ok(n) => {
                    markers.tgw_count.insert(region.clone(), n);
                }
                Err(e) => debug!(%region, error = %e, "transit router count unavailable"),
            }
            match vpcs {
                Ok(n) => {
                    markers.vpc_count.insert(region.clone(), n);
                }
                Err(e) => debug!(%region, error = %e, "VPC count unavailable"),
            }
        }

        markers
    }

    /// Persist markers alongside the topology cache
    pub fn save_markers(&self, markers: &ChangeMarkers) -> Result<()> {
        self.cache.set(markers, MARKERS_TTL, None)
    }

    /// Last saved markers; markers are only replaced, never expired
    pub fn saved_markers(&self) -> Option<ChangeMarkers> {
        self.cache.get_ignoring_expiry()
    }

    /// Compare fresh markers for `regions` against the saved ones
    pub async fn is_stale(&self, regions: &[String]) -> StaleCheck {
        let Some(saved) = self.saved_markers() else {
            return StaleCheck::stale("No markers saved");
        };

        let current = self.get_current_markers(regions).await;
        match saved.diff(&current) {
            Some(reason) => StaleCheck::stale(reason),
            None => StaleCheck::fresh(),
        }
    }
}
