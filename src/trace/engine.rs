use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::hop::{Hop, HopKind, TraceResult};
use super::observer::TraceObserver;
use super::route::select_route;
use crate::cloud::{CloudApi, name_tag};
use crate::config::{CacheMode, Config};
use crate::error::DiscoveryError;
use crate::topology::TopologyDiscovery;
use crate::topology::model::{InterfaceRecord, NetworkTopology, RouteTable};

/// Computes paths between two addresses from a topology snapshot
///
/// The snapshot is loaded (from cache or by discovery) on the first trace and
/// shared by every trace after that.
pub struct Tracer {
    api: Arc<dyn CloudApi>,
    discovery: TopologyDiscovery,
    observer: Arc<dyn TraceObserver>,
    config: Config,
    topology: OnceCell<Arc<NetworkTopology>>,
}

impl Tracer {
    pub fn new(api: Arc<dyn CloudApi>, config: Config, observer: Arc<dyn TraceObserver>) -> Self {
        let discovery = TopologyDiscovery::new(api.clone(), &config, observer.clone());
        Self {
            api,
            discovery,
            observer,
            config,
            topology: OnceCell::new(),
        }
    }

    /// Tracer over an already loaded snapshot
    pub fn with_topology(
        api: Arc<dyn CloudApi>,
        config: Config,
        observer: Arc<dyn TraceObserver>,
        topology: NetworkTopology,
    ) -> Self {
        let mut tracer = Self::new(api, config, observer);
        tracer.topology = OnceCell::new_with(Some(Arc::new(topology)));
        tracer
    }

    pub fn discovery(&self) -> &TopologyDiscovery {
        &self.discovery
    }

    /// Snapshot used for tracing, loading it on first use
    pub async fn topology(&self) -> Result<Arc<NetworkTopology>, DiscoveryError> {
        self.topology
            .get_or_try_init(|| async {
                let mode = self.config.cache_mode;
                if mode == CacheMode::Refresh
                    && let Err(e) = self.discovery.clear_cache()
                {
                    warn!(error = %e, "failed to clear topology cache");
                }

                if matches!(mode, CacheMode::Validate | CacheMode::Trust)
                    && let Some(topology) =
                        self.discovery.get_cached(mode == CacheMode::Validate).await
                {
                    self.status("Using cached topology");
                    return Ok(Arc::new(topology));
                }

                self.status("Discovering network topology (this may take a minute)...");
                let topology = self.discovery.discover(self.config.regions.clone()).await?;
                Ok::<_, DiscoveryError>(Arc::new(topology))
            })
            .await
            .cloned()
    }

    fn status(&self, msg: &str) {
        debug!(status = msg);
        self.observer.on_status(msg);
    }

    /// Trace the path from `src` to `dst`
    ///
    /// Unreachable destinations are a normal result; only a failure to obtain
    /// any topology is an error.
    pub async fn trace(&self, src: IpAddr, dst: IpAddr) -> Result<TraceResult, DiscoveryError> {
        let topology = self.topology().await?;
        let mut path = PathBuilder::new(src, dst, self.observer.as_ref());

        let Some(src_eni) = self.resolve(&topology, src).await else {
            return Ok(path.block(format!("Source IP {} not found in topology", src)));
        };
        let Some(dst_eni) = self.resolve(&topology, dst).await else {
            return Ok(path.block(format!("Destination IP {} not found in topology", dst)));
        };

        path.push(
            HopKind::Interface,
            &src_eni.interface_id,
            format!("src:{}", src),
            &src_eni.region,
            detail([
                ("vpc_id", src_eni.vpc_id.clone()),
                ("subnet_id", src_eni.subnet_id.clone()),
                ("security_groups", src_eni.security_groups.join(",")),
            ]),
        );

        let table = match topology.route_table_for(&src_eni.subnet_id, &src_eni.vpc_id) {
            Some(table) => table.clone(),
            None => self.live_route_table(&src_eni).await,
        };
        path.push(
            HopKind::RouteTable,
            &table.id,
            table.name.clone(),
            &src_eni.region,
            BTreeMap::new(),
        );

        let Some(route) = select_route(&table.routes, dst) else {
            return Ok(path.block(format!("No route to {} in route table {}", dst, table.id)));
        };
        debug!(destination = %route.destination, target = %route.target, "route selected");

        if route.is_local() && src_eni.vpc_id == dst_eni.vpc_id {
            path.destination(&dst_eni, BTreeMap::new());
            return Ok(path.reachable());
        }

        if route.core_network_arn.is_some() {
            return Ok(self.trace_backbone(&topology, path, &src_eni, &dst_eni));
        }

        if route.target.starts_with("tgw-") {
            let name = topology
                .transit_gateway(&route.target)
                .and_then(|tgw| name_tag(&tgw.tags))
                .unwrap_or("transit-gateway")
                .to_string();
            path.push(
                HopKind::TransitRouter,
                &route.target,
                name,
                &src_eni.region,
                BTreeMap::new(),
            );
            path.destination(&dst_eni, BTreeMap::new());
            return Ok(path.reachable());
        }

        Ok(path.block(format!("Unsupported route target: {}", route.target)))
    }

    fn trace_backbone(
        &self,
        topology: &NetworkTopology,
        mut path: PathBuilder<'_>,
        src_eni: &InterfaceRecord,
        dst_eni: &InterfaceRecord,
    ) -> TraceResult {
        let dst_segment = topology.segment_for(&dst_eni.vpc_id, &dst_eni.region);
        let Some(src_segment) = topology.segment_for(&src_eni.vpc_id, &src_eni.region) else {
            return path.block(format!(
                "Source VPC {} not attached to backbone network",
                src_eni.vpc_id
            ));
        };

        path.push(
            HopKind::BackboneSegment,
            src_segment,
            format!("segment:{}", src_segment),
            &src_eni.region,
            BTreeMap::new(),
        );

        if let Some(group) = topology.policy.send_via_group(src_segment, dst_segment) {
            path.push(
                HopKind::InspectionGroup,
                group,
                format!("inspection:{}", group),
                &src_eni.region,
                BTreeMap::new(),
            );

            if let Some(att) = topology.inspection_attachment(group, &src_eni.region) {
                let resource = att.resource_arn.rsplit('/').next().unwrap_or_default();
                path.push(
                    HopKind::Firewall,
                    resource,
                    name_tag(&att.tags).unwrap_or("firewall").to_string(),
                    &att.edge_location,
                    detail([("attachment_id", att.attachment_id.clone())]),
                );
            }
        }

        if src_eni.region != dst_eni.region {
            path.push(
                HopKind::BackboneSegment,
                dst_segment.unwrap_or("unknown"),
                format!("segment:{}@{}", dst_segment.unwrap_or("unknown"), dst_eni.region),
                &dst_eni.region,
                BTreeMap::new(),
            );
        }

        let mut dst_detail = detail([("vpc_id", dst_eni.vpc_id.clone())]);
        if let Some(segment) = dst_segment {
            dst_detail.insert("segment".to_string(), segment.to_string());
        }
        path.destination(dst_eni, dst_detail);
        path.reachable()
    }

    /// Interface owning `ip`, searching live when the snapshot misses
    async fn resolve(&self, topology: &NetworkTopology, ip: IpAddr) -> Option<InterfaceRecord> {
        let key = ip.to_string();
        if let Some(record) = topology.eni_index.get(&key) {
            return Some(record);
        }

        self.status(&format!("IP {} not in cache, searching...", ip));
        let regions = if topology.regions.is_empty() {
            self.api.list_regions().await.unwrap_or_else(|e| {
                warn!(error = %e, "cannot list regions for address search");
                Vec::new()
            })
        } else {
            topology.regions.clone()
        };

        let ordered = order_regions(
            &regions,
            &self.config.preferred_regions,
            self.config.fallback_region_limit,
        );
        for region in ordered {
            match self.api.find_network_interface(region, &key).await {
                Ok(Some(eni)) => {
                    let record = InterfaceRecord::from_interface(&eni, region);
                    info!(%ip, %region, interface = %record.interface_id, "address found live");
                    topology.eni_index.insert(key, record.clone());
                    return Some(record);
                }
                Ok(None) => {}
                Err(e) => debug!(%ip, %region, error = %e, "address search failed"),
            }
        }
        None
    }

    /// Route table for an interface's subnet, fetched live
    async fn live_route_table(&self, eni: &InterfaceRecord) -> RouteTable {
        let tables = match self
            .api
            .list_route_tables(&eni.region, std::slice::from_ref(&eni.vpc_id))
            .await
        {
            Ok(tables) => tables,
            Err(e) => {
                warn!(vpc = %eni.vpc_id, error = %e, "route table lookup failed");
                return RouteTable::unknown(&eni.vpc_id);
            }
        };

        let associated = tables.iter().find(|rt| {
            rt.associations
                .iter()
                .any(|a| a.subnet_id.as_deref() == Some(eni.subnet_id.as_str()))
        });
        let main = || tables.iter().find(|rt| rt.associations.iter().any(|a| a.main));

        associated
            .or_else(main)
            .map(RouteTable::from_raw)
            .unwrap_or_else(|| RouteTable::unknown(&eni.vpc_id))
    }
}

/// Search order for an address missing from the snapshot
///
/// Preferred regions present in `regions` come first, then the rest in their
/// listed order, truncated to `limit` when set.
pub fn order_regions<'a>(
    regions: &'a [String],
    preferred: &[String],
    limit: Option<usize>,
) -> Vec<&'a str> {
    let mut ordered: Vec<&str> = preferred
        .iter()
        .filter_map(|p| regions.iter().find(|r| *r == p))
        .map(String::as_str)
        .collect();
    ordered.extend(
        regions
            .iter()
            .filter(|r| !preferred.contains(r))
            .map(String::as_str),
    );
    ordered.dedup();
    if let Some(limit) = limit {
        ordered.truncate(limit);
    }
    ordered
}

fn detail<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Accumulates hops, numbering them and notifying the observer
struct PathBuilder<'a> {
    result: TraceResult,
    observer: &'a dyn TraceObserver,
}

impl<'a> PathBuilder<'a> {
    fn new(src: IpAddr, dst: IpAddr, observer: &'a dyn TraceObserver) -> Self {
        Self {
            result: TraceResult::new(src, dst),
            observer,
        }
    }

    fn push(
        &mut self,
        kind: HopKind,
        id: &str,
        name: String,
        region: &str,
        detail: BTreeMap<String, String>,
    ) {
        let hop = Hop {
            seq: self.result.hops.len() as u32 + 1,
            kind,
            id: id.to_string(),
            name,
            region: region.to_string(),
            detail,
        };
        self.observer.on_hop(&hop);
        self.result.hops.push(hop);
    }

    fn destination(&mut self, eni: &InterfaceRecord, detail: BTreeMap<String, String>) {
        let name = format!("dst:{}", self.result.dst_ip);
        self.push(HopKind::Destination, &eni.interface_id, name, &eni.region, detail);
    }

    fn reachable(mut self) -> TraceResult {
        self.result.reachable = true;
        self.result
    }

    /// Stop at the last hop pushed so far
    ///
    /// Blocks found while routing (no route, source not attached to the
    /// backbone, unsupported target) therefore point `blocked_at` at the
    /// route-table hop. Unresolved addresses block before any hop, leaving
    /// `blocked_at` unset.
    fn block(mut self, reason: String) -> TraceResult {
        debug!(reason = %reason, "trace blocked");
        self.result.blocked_at = self.result.hops.last().cloned();
        self.result.blocked_reason = reason;
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_order_regions_preferred_first() {
        let all = regions(&["ap-south-1", "us-east-1", "eu-west-1", "sa-east-1"]);
        let preferred = regions(&["eu-west-1", "eu-west-2", "us-east-1"]);
        assert_eq!(
            order_regions(&all, &preferred, None),
            vec!["eu-west-1", "us-east-1", "ap-south-1", "sa-east-1"]
        );
    }

    #[test]
    fn test_order_regions_limit() {
        let all = regions(&["ap-south-1", "us-east-1", "eu-west-1"]);
        let preferred = regions(&["us-east-1"]);
        assert_eq!(order_regions(&all, &preferred, Some(2)), vec!["us-east-1", "ap-south-1"]);
        assert!(order_regions(&[], &preferred, None).is_empty());
    }

    #[test]
    fn test_path_builder_numbers_hops() {
        let observer = crate::trace::NoopObserver;
        let mut path = PathBuilder::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            &observer,
        );
        path.push(HopKind::Interface, "eni-1", "src".into(), "eu-west-1", BTreeMap::new());
        path.push(HopKind::RouteTable, "rtb-1", String::new(), "eu-west-1", BTreeMap::new());
        let result = path.block("No route".into());

        assert_eq!(result.hops.iter().map(|h| h.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(result.blocked_at.unwrap().id, "rtb-1");
        assert!(!result.reachable);
    }

    #[test]
    fn test_block_before_any_hop() {
        let observer = crate::trace::NoopObserver;
        let path = PathBuilder::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            &observer,
        );
        let result = path.block("Source IP 10.0.0.1 not found in topology".into());
        assert!(result.hops.is_empty());
        assert!(result.blocked_at.is_none());
    }
}
