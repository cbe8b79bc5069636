//! Network topology discovery and caching.
//!
//! A discovery run fans out one unit of work per service and region onto a
//! fixed-size worker pool and merges the results in region order. A unit that
//! fails is logged and contributes nothing; only failures that leave nothing to
//! discover at all are returned as errors.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::markers::{MARKERS_NAMESPACE, StalenessChecker};
use super::model::{
    AddressIndex, CorePolicy, InterfaceRecord, NetworkTopology, RouteTable, main_route_table_key,
};
use crate::cache::{Cache, CacheInfo};
use crate::cloud::{
    Attachment, CloudApi, CoreNetwork, GlobalNetwork, TgwRouteTable, TransitGateway, Vpc,
};
use crate::config::Config;
use crate::error::DiscoveryError;
use crate::trace::TraceObserver;

/// Cache namespace holding the topology snapshot
pub const TOPOLOGY_NAMESPACE: &str = "topology";

/// Backbone network contribution
#[derive(Debug, Default)]
struct Backbone {
    global_networks: Vec<GlobalNetwork>,
    core_networks: Vec<CoreNetwork>,
    attachments: Vec<Attachment>,
    policy: CorePolicy,
    policy_version: Option<u64>,
}

/// Transit routers of one region
#[derive(Debug, Default)]
struct RegionTgws {
    tgws: Vec<TransitGateway>,
    route_tables: Vec<(String, Vec<TgwRouteTable>)>,
}

/// VPCs of one region and their route tables keyed for lookup
#[derive(Debug, Default)]
struct RegionVpcs {
    vpcs: Vec<Vpc>,
    route_tables: Vec<(String, RouteTable)>,
}

/// Discovers and caches the network topology of one account
pub struct TopologyDiscovery {
    api: Arc<dyn CloudApi>,
    cache: Cache,
    staleness: StalenessChecker,
    observer: Arc<dyn TraceObserver>,
    pool: Arc<Semaphore>,
    ttl: Duration,
}

impl TopologyDiscovery {
    pub fn new(api: Arc<dyn CloudApi>, config: &Config, observer: Arc<dyn TraceObserver>) -> Self {
        let cache_dir = config.cache_dir();
        let staleness = StalenessChecker::new(
            api.clone(),
            Cache::new(&cache_dir, MARKERS_NAMESPACE),
            config.marker_region_limit,
        );
        Self {
            api,
            cache: Cache::new(&cache_dir, TOPOLOGY_NAMESPACE),
            staleness,
            observer,
            pool: Arc::new(Semaphore::new(config.workers.max(1))),
            ttl: config.cache_ttl,
        }
    }

    pub fn staleness(&self) -> &StalenessChecker {
        &self.staleness
    }

    fn status(&self, msg: &str) {
        debug!(status = msg);
        self.observer.on_status(msg);
    }

    /// Run `work` once a pool slot is free
    async fn pooled<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let _permit = self.pool.acquire().await?;
        work.await
    }

    /// Cached topology for the current account, if fresh
    pub async fn get_cached(&self, check_staleness: bool) -> Option<NetworkTopology> {
        let account_id = match self.api.account_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "cannot resolve account, ignoring cache");
                return None;
            }
        };
        let topology: NetworkTopology = self.cache.get(Some(&account_id))?;

        if check_staleness {
            self.status("Checking for changes...");
            // Only regions that were sampled when the markers were saved
            let regions = self
                .staleness
                .saved_markers()
                .map(|m| m.regions())
                .unwrap_or_default();
            let check = self.staleness.is_stale(&regions).await;
            if check.stale {
                self.status(&format!("Cache stale: {}", check.reason));
                return None;
            }
        }

        Some(topology)
    }

    /// Remove the cached topology
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()
    }

    pub fn cache_info(&self) -> Option<CacheInfo> {
        self.cache.info()
    }

    /// Discover the full topology and cache it
    pub async fn discover(
        &self,
        regions: Option<Vec<String>>,
    ) -> Result<NetworkTopology, DiscoveryError> {
        let account_id = self.api.account_id().await.map_err(DiscoveryError::Account)?;

        self.status("Getting regions...");
        let regions = match regions {
            Some(regions) if !regions.is_empty() => regions,
            _ => self.api.list_regions().await.map_err(DiscoveryError::Regions)?,
        };

        let (backbone, tgws, vpcs, enis) = tokio::join!(
            self.discover_backbone(),
            self.discover_tgws(&regions),
            self.discover_vpcs(&regions),
            self.build_eni_index(&regions),
        );

        let units = 1 + 3 * regions.len();
        let mut failed = 0;
        let mut topology = NetworkTopology::new(account_id.clone(), regions.clone());

        match backbone {
            Ok(backbone) => {
                topology.global_networks = backbone.global_networks;
                topology.core_networks = backbone.core_networks;
                topology.attachments = backbone.attachments;
                topology.policy = backbone.policy;
                topology.policy_version = backbone.policy_version;
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "backbone discovery failed");
                failed += 1;
            }
        }

        for (region, result) in regions.iter().zip(tgws) {
            match result {
                Ok(found) => {
                    if !found.tgws.is_empty() {
                        topology.tgws.insert(region.clone(), found.tgws);
                    }
                    topology.tgw_route_tables.extend(found.route_tables);
                }
                Err(e) => {
                    warn!(%region, error = %format!("{:#}", e), "transit router discovery failed");
                    failed += 1;
                }
            }
        }

        for (region, result) in regions.iter().zip(vpcs) {
            match result {
                Ok(found) => {
                    if !found.vpcs.is_empty() {
                        topology.vpcs.insert(region.clone(), found.vpcs);
                    }
                    topology.route_tables.extend(found.route_tables);
                }
                Err(e) => {
                    warn!(%region, error = %format!("{:#}", e), "VPC discovery failed");
                    failed += 1;
                }
            }
        }

        let mut index = BTreeMap::new();
        for (region, result) in regions.iter().zip(enis) {
            match result {
                Ok(entries) => index.extend(entries),
                Err(e) => {
                    warn!(%region, error = %format!("{:#}", e), "interface discovery failed");
                    failed += 1;
                }
            }
        }
        topology.eni_index = AddressIndex::from(index);

        if failed == units {
            return Err(DiscoveryError::AllFetchesFailed { units });
        }

        self.status("Caching topology...");
        if let Err(e) = self.cache.set(&topology, self.ttl, Some(&account_id)) {
            warn!(error = %e, "failed to cache topology");
        }

        let markers = self.staleness.get_current_markers(&regions).await;
        if let Err(e) = self.staleness.save_markers(&markers) {
            warn!(error = %e, "failed to save change markers");
        }

        info!(
            account = %account_id,
            regions = regions.len(),
            vpcs = topology.vpcs.values().map(Vec::len).sum::<usize>(),
            interfaces = topology.eni_index.len(),
            failed,
            "topology discovered"
        );
        Ok(topology)
    }

    async fn discover_backbone(&self) -> Result<Backbone> {
        self.pooled(async {
            self.status("Discovering backbone network...");
            let mut backbone = Backbone {
                global_networks: self.api.list_global_networks().await?,
                core_networks: self.api.list_core_networks().await?,
                ..Default::default()
            };

            let Some(core_id) = backbone
                .core_networks
                .first()
                .map(|c| c.core_network_id.clone())
            else {
                return Ok(backbone);
            };

            let document = self.api.get_core_network_policy(&core_id).await?;
            backbone.policy_version = document.version_id;
            backbone.policy = CorePolicy::parse(&document.document)
                .with_context(|| format!("invalid policy document for {}", core_id))?;

            self.status("Getting backbone attachments...");
            let mut token = None;
            loop {
                let page = self.api.list_attachments(&core_id, token).await?;
                backbone.attachments.extend(page.items);
                token = page.next_token;
                if token.is_none() {
                    break;
                }
            }

            Ok(backbone)
        })
        .await
    }

    async fn discover_tgws(&self, regions: &[String]) -> Vec<Result<RegionTgws>> {
        self.status("Discovering transit routers...");
        join_all(
            regions
                .iter()
                .map(|region| self.pooled(self.fetch_region_tgws(region))),
        )
        .await
    }

    async fn fetch_region_tgws(&self, region: &str) -> Result<RegionTgws> {
        let tgws = self.api.list_transit_gateways(region).await?;
        let mut route_tables = Vec::with_capacity(tgws.len());
        for tgw in &tgws {
            match self
                .api
                .list_transit_gateway_route_tables(region, &tgw.transit_gateway_id)
                .await
            {
                Ok(tables) => route_tables.push((tgw.transit_gateway_id.clone(), tables)),
                Err(e) => warn!(
                    %region,
                    tgw = %tgw.transit_gateway_id,
                    error = %e,
                    "transit router route tables unavailable"
                ),
            }
        }
        Ok(RegionTgws { tgws, route_tables })
    }

    async fn discover_vpcs(&self, regions: &[String]) -> Vec<Result<RegionVpcs>> {
        self.status("Discovering VPCs and route tables...");
        join_all(
            regions
                .iter()
                .map(|region| self.pooled(self.fetch_region_vpcs(region))),
        )
        .await
    }

    async fn fetch_region_vpcs(&self, region: &str) -> Result<RegionVpcs> {
        let vpcs = self.api.list_vpcs(region).await?;
        if vpcs.is_empty() {
            return Ok(RegionVpcs::default());
        }

        let vpc_ids: Vec<String> = vpcs.iter().map(|v| v.vpc_id.clone()).collect();
        let raw_tables = self.api.list_route_tables(region, &vpc_ids).await?;

        let mut route_tables = Vec::new();
        for raw in &raw_tables {
            let table = RouteTable::from_raw(raw);
            for assoc in &raw.associations {
                if let Some(subnet_id) = &assoc.subnet_id {
                    route_tables.push((subnet_id.clone(), table.clone()));
                }
                if assoc.main {
                    route_tables.push((main_route_table_key(&raw.vpc_id), table.clone()));
                }
            }
        }

        Ok(RegionVpcs { vpcs, route_tables })
    }

    async fn build_eni_index(
        &self,
        regions: &[String],
    ) -> Vec<Result<Vec<(String, InterfaceRecord)>>> {
        self.status("Building address index...");
        join_all(
            regions
                .iter()
                .map(|region| self.pooled(self.fetch_region_enis(region))),
        )
        .await
    }

    async fn fetch_region_enis(&self, region: &str) -> Result<Vec<(String, InterfaceRecord)>> {
        let mut entries = Vec::new();
        let mut token = None;
        loop {
            let page = self.api.list_network_interfaces(region, token).await?;
            for eni in &page.items {
                let record = InterfaceRecord::from_interface(eni, region);
                for ip in &eni.private_ip_addresses {
                    entries.push((ip.clone(), record.clone()));
                }
            }
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{
        Association, Inventory, InventoryApi, NetworkInterface, PolicyDocument, RawRoute,
        RawRouteTable, RegionInventory,
    };
    use crate::trace::NoopObserver;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct StatusLog(Mutex<Vec<String>>);

    impl TraceObserver for StatusLog {
        fn on_status(&self, msg: &str) {
            self.0.lock().push(msg.to_string());
        }
    }

    fn region(vpc: &str, subnet: &str, ips: &[&str]) -> RegionInventory {
        RegionInventory {
            vpcs: vec![Vpc {
                vpc_id: vpc.to_string(),
                cidr_block: "10.0.0.0/16".to_string(),
                is_default: false,
                tags: vec![],
            }],
            route_tables: vec![RawRouteTable {
                route_table_id: format!("rtb-{}", vpc),
                vpc_id: vpc.to_string(),
                routes: vec![RawRoute {
                    destination_cidr_block: Some("10.0.0.0/16".to_string()),
                    gateway_id: Some("local".to_string()),
                    ..Default::default()
                }],
                associations: vec![
                    Association {
                        subnet_id: Some(subnet.to_string()),
                        main: false,
                    },
                    Association {
                        subnet_id: None,
                        main: true,
                    },
                ],
                tags: vec![],
            }],
            network_interfaces: ips
                .iter()
                .enumerate()
                .map(|(i, ip)| NetworkInterface {
                    network_interface_id: format!("eni-{}-{}", vpc, i),
                    vpc_id: vpc.to_string(),
                    subnet_id: subnet.to_string(),
                    private_ip_addresses: vec![ip.to_string()],
                    security_groups: vec![],
                })
                .collect(),
            ..Default::default()
        }
    }

    fn inventory() -> Inventory {
        let mut inventory = Inventory {
            account_id: "111122223333".to_string(),
            core_networks: vec![CoreNetwork {
                core_network_id: "core-network-1".to_string(),
                global_network_id: "global-network-1".to_string(),
                state: "AVAILABLE".to_string(),
            }],
            ..Default::default()
        };
        inventory.policies.insert(
            "core-network-1".to_string(),
            PolicyDocument {
                version_id: Some(3),
                document: String::new(),
            },
        );
        inventory
            .regions
            .insert(
                "eu-west-1".to_string(),
                region("vpc-a", "subnet-a", &["10.0.1.5", "10.0.1.6", "10.0.1.7"]),
            );
        inventory
            .regions
            .insert("us-east-1".to_string(), region("vpc-b", "subnet-b", &["10.1.1.5"]));
        inventory
    }

    fn discovery(api: InventoryApi, dir: &std::path::Path) -> TopologyDiscovery {
        let config = Config {
            cache_dir: Some(dir.to_path_buf()),
            workers: 2,
            ..Default::default()
        };
        TopologyDiscovery::new(Arc::new(api), &config, Arc::new(NoopObserver))
    }

    #[tokio::test]
    async fn test_discover_builds_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let api = InventoryApi::new(inventory()).with_page_size(2);
        let topology = discovery(api, dir.path()).discover(None).await.unwrap();

        assert_eq!(topology.account_id, "111122223333");
        assert_eq!(topology.regions, vec!["eu-west-1", "us-east-1"]);
        assert_eq!(topology.policy_version, Some(3));
        assert_eq!(topology.eni_index.len(), 4);
        assert_eq!(topology.eni_index.get("10.1.1.5").unwrap().region, "us-east-1");

        assert_eq!(topology.route_tables["subnet-a"].id, "rtb-vpc-a");
        assert_eq!(topology.route_tables["main:vpc-b"].id, "rtb-vpc-b");
        assert_eq!(topology.vpcs["eu-west-1"][0].vpc_id, "vpc-a");
    }

    #[tokio::test]
    async fn test_discover_writes_cache_and_markers() {
        let dir = tempfile::tempdir().unwrap();
        let d = discovery(InventoryApi::new(inventory()), dir.path());
        d.discover(None).await.unwrap();

        let info = d.cache_info().unwrap();
        assert_eq!(info.account_id.as_deref(), Some("111122223333"));
        assert!(!info.expired);

        let markers = d.staleness().saved_markers().unwrap();
        assert_eq!(markers.policy_version, Some(3));
        assert_eq!(markers.vpc_count["eu-west-1"], 1);

        let cached = d.get_cached(true).await.unwrap();
        assert_eq!(cached.eni_index.len(), 4);
    }

    #[tokio::test]
    async fn test_explicit_regions_limit_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let d = discovery(InventoryApi::new(inventory()), dir.path());
        let topology = d
            .discover(Some(vec!["us-east-1".to_string()]))
            .await
            .unwrap();
        assert_eq!(topology.regions, vec!["us-east-1"]);
        assert!(!topology.eni_index.contains("10.0.1.5"));
        assert!(topology.eni_index.contains("10.1.1.5"));
    }

    #[tokio::test]
    async fn test_unknown_region_is_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let d = discovery(InventoryApi::new(inventory()), dir.path());
        let topology = d
            .discover(Some(vec!["ap-south-1".to_string(), "eu-west-1".to_string()]))
            .await
            .unwrap();
        assert_eq!(topology.eni_index.len(), 3);
        assert!(!topology.vpcs.contains_key("ap-south-1"));
    }

    #[tokio::test]
    async fn test_all_units_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = inventory();
        // Policy lookup fails and every region is unknown
        inv.policies.clear();
        let d = discovery(InventoryApi::new(inv), dir.path());
        let err = d
            .discover(Some(vec!["ap-south-1".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::AllFetchesFailed { units: 4 }));
        assert!(d.cache_info().is_none());
    }

    #[tokio::test]
    async fn test_get_cached_stale_after_change() {
        let dir = tempfile::tempdir().unwrap();
        discovery(InventoryApi::new(inventory()), dir.path())
            .discover(None)
            .await
            .unwrap();

        let mut changed = inventory();
        changed.policies.get_mut("core-network-1").unwrap().version_id = Some(4);
        let log = Arc::new(StatusLog::default());
        let config = Config {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let d = TopologyDiscovery::new(Arc::new(InventoryApi::new(changed)), &config, log.clone());

        assert!(d.get_cached(false).await.is_some());
        assert!(d.get_cached(true).await.is_none());
        let statuses = log.0.lock().clone();
        assert!(statuses.contains(&"Checking for changes...".to_string()));
        assert!(statuses.contains(&"Cache stale: Backbone policy changed: 3 → 4".to_string()));
    }

    #[tokio::test]
    async fn test_status_events_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(StatusLog::default());
        let config = Config {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let api = Arc::new(InventoryApi::new(inventory()));
        let d = TopologyDiscovery::new(api, &config, log.clone());
        d.discover(None).await.unwrap();

        let statuses = log.0.lock().clone();
        assert_eq!(statuses.first().map(String::as_str), Some("Getting regions..."));
        assert_eq!(statuses.last().map(String::as_str), Some("Caching topology..."));
        for expected in [
            "Discovering backbone network...",
            "Discovering transit routers...",
            "Discovering VPCs and route tables...",
            "Building address index...",
        ] {
            assert!(statuses.iter().any(|s| s == expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_clear_cache_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let d = discovery(InventoryApi::new(inventory()), dir.path());
        d.discover(None).await.unwrap();
        d.clear_cache().unwrap();
        d.clear_cache().unwrap();
        assert!(d.cache_info().is_none());
        assert!(d.get_cached(false).await.is_none());
    }
}
