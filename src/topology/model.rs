use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::cloud::{
    Attachment, CoreNetwork, GlobalNetwork, NetworkInterface, RawRoute, RawRouteTable,
    TgwRouteTable, TransitGateway, Vpc, name_tag,
};

/// Key under which a VPC's main route table is stored in
/// [`NetworkTopology::route_tables`]
pub fn main_route_table_key(vpc_id: &str) -> String {
    format!("main:{}", vpc_id)
}

/// Forwarding state of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteState {
    #[default]
    Active,
    Blackhole,
}

/// A single route table entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Destination CIDR (may be empty for prefix-list routes)
    pub destination: String,
    /// Target id, or `local`
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_network_arn: Option<String>,
    #[serde(default)]
    pub state: RouteState,
}

impl Route {
    pub fn from_raw(raw: &RawRoute) -> Self {
        let target = raw
            .gateway_id
            .as_ref()
            .or(raw.nat_gateway_id.as_ref())
            .or(raw.transit_gateway_id.as_ref())
            .or(raw.network_interface_id.as_ref())
            .cloned()
            .unwrap_or_else(|| "local".to_string());
        let destination = raw
            .destination_cidr_block
            .as_ref()
            .or(raw.destination_ipv6_cidr_block.as_ref())
            .cloned()
            .unwrap_or_default();
        let state = match raw.state.as_deref() {
            Some("blackhole") => RouteState::Blackhole,
            _ => RouteState::Active,
        };

        Self {
            destination,
            target,
            core_network_arn: raw.core_network_arn.clone(),
            state,
        }
    }

    pub fn is_local(&self) -> bool {
        self.target == "local"
    }
}

/// Parsed VPC route table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vpc_id: String,
    pub routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_raw(raw: &RawRouteTable) -> Self {
        Self {
            id: raw.route_table_id.clone(),
            name: name_tag(&raw.tags).unwrap_or_default().to_string(),
            vpc_id: raw.vpc_id.clone(),
            routes: raw.routes.iter().map(Route::from_raw).collect(),
        }
    }

    /// Placeholder for a subnet whose table could not be determined
    pub fn unknown(vpc_id: &str) -> Self {
        Self {
            id: "unknown".to_string(),
            name: String::new(),
            vpc_id: vpc_id.to_string(),
            routes: Vec::new(),
        }
    }
}

/// Which segments a send-via action applies to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SegmentSelector {
    Named(Vec<String>),
    /// `"*"` selects every segment
    Wildcard(String),
}

impl Default for SegmentSelector {
    fn default() -> Self {
        Self::Named(Vec::new())
    }
}

impl SegmentSelector {
    pub fn matches(&self, segment: Option<&str>) -> bool {
        match self {
            Self::Wildcard(w) => w == "*",
            Self::Named(names) => segment.is_some_and(|s| names.iter().any(|n| n == s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WhenSentTo {
    #[serde(default)]
    pub segments: SegmentSelector,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Via {
    #[serde(default)]
    pub network_function_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SegmentAction {
    pub action: String,
    #[serde(default)]
    pub segment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_sent_to: Option<WhenSentTo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<Via>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicySegment {
    pub name: String,
    #[serde(default)]
    pub edge_locations: Vec<String>,
}

/// Backbone routing policy document (the parts routing depends on)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CorePolicy {
    #[serde(default)]
    pub segments: Vec<PolicySegment>,
    #[serde(default)]
    pub segment_actions: Vec<SegmentAction>,
}

impl CorePolicy {
    /// Parse a policy document; an empty document is an empty policy
    pub fn parse(document: &str) -> serde_json::Result<Self> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(document)
    }

    /// Inspection group that traffic from `src` to `dst` is sent through
    ///
    /// Only the first send-via action for `src` whose selector covers `dst` is
    /// considered.
    pub fn send_via_group(&self, src: &str, dst: Option<&str>) -> Option<&str> {
        let action = self.segment_actions.iter().find(|a| {
            a.action == "send-via"
                && a.segment == src
                && a.when_sent_to
                    .as_ref()
                    .is_some_and(|w| w.segments.matches(dst))
        })?;
        action
            .via
            .as_ref()?
            .network_function_groups
            .first()
            .map(String::as_str)
    }
}

/// Address index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub interface_id: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub subnet_id: String,
    pub region: String,
    #[serde(default)]
    pub security_groups: Vec<String>,
}

impl InterfaceRecord {
    pub fn from_interface(eni: &NetworkInterface, region: &str) -> Self {
        Self {
            interface_id: eni.network_interface_id.clone(),
            vpc_id: eni.vpc_id.clone(),
            subnet_id: eni.subnet_id.clone(),
            region: region.to_string(),
            security_groups: eni.security_groups.clone(),
        }
    }
}

/// IP address -> interface map
///
/// Lock-guarded so traces sharing one snapshot can add live-lookup results
/// concurrently. Serializes as a plain map.
#[derive(Debug, Default)]
pub struct AddressIndex {
    entries: RwLock<BTreeMap<String, InterfaceRecord>>,
}

impl AddressIndex {
    pub fn get(&self, ip: &str) -> Option<InterfaceRecord> {
        self.entries.read().get(ip).cloned()
    }

    pub fn insert(&self, ip: String, record: InterfaceRecord) {
        self.entries.write().insert(ip, record);
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.entries.read().contains_key(ip)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Clone for AddressIndex {
    fn clone(&self) -> Self {
        Self::from(self.entries.read().clone())
    }
}

impl From<BTreeMap<String, InterfaceRecord>> for AddressIndex {
    fn from(entries: BTreeMap<String, InterfaceRecord>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl FromIterator<(String, InterfaceRecord)> for AddressIndex {
    fn from_iter<I: IntoIterator<Item = (String, InterfaceRecord)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<BTreeMap<_, _>>())
    }
}

impl Serialize for AddressIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.read().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AddressIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, InterfaceRecord>::deserialize(deserializer).map(Self::from)
    }
}

/// Point-in-time snapshot of an account's network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub account_id: String,
    pub regions: Vec<String>,

    // Backbone network
    #[serde(default)]
    pub global_networks: Vec<GlobalNetwork>,
    #[serde(default)]
    pub core_networks: Vec<CoreNetwork>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub policy: CorePolicy,
    #[serde(default)]
    pub policy_version: Option<u64>,

    /// region -> transit routers
    #[serde(default)]
    pub tgws: BTreeMap<String, Vec<TransitGateway>>,
    /// transit router id -> route tables
    #[serde(default)]
    pub tgw_route_tables: BTreeMap<String, Vec<TgwRouteTable>>,

    /// region -> VPCs
    #[serde(default)]
    pub vpcs: BTreeMap<String, Vec<Vpc>>,

    /// subnet id or `main:<vpc id>` -> route table
    #[serde(default)]
    pub route_tables: BTreeMap<String, RouteTable>,

    #[serde(default)]
    pub eni_index: AddressIndex,
}

impl NetworkTopology {
    pub fn new(account_id: impl Into<String>, regions: Vec<String>) -> Self {
        Self {
            account_id: account_id.into(),
            regions,
            ..Default::default()
        }
    }

    /// Route table for a subnet, falling back to the VPC's main table
    pub fn route_table_for(&self, subnet_id: &str, vpc_id: &str) -> Option<&RouteTable> {
        self.route_tables
            .get(subnet_id)
            .or_else(|| self.route_tables.get(&main_route_table_key(vpc_id)))
    }

    /// Segment a VPC is attached to at `region`
    pub fn segment_for(&self, vpc_id: &str, region: &str) -> Option<&str> {
        self.attachments
            .iter()
            .find(|a| a.resource_arn.ends_with(vpc_id) && a.edge_location == region)
            .and_then(|a| a.segment_name.as_deref())
    }

    /// First attachment serving inspection group `group` at `region`
    pub fn inspection_attachment(&self, group: &str, region: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| {
            a.network_function_group_name.as_deref() == Some(group) && a.edge_location == region
        })
    }

    pub fn transit_gateway(&self, tgw_id: &str) -> Option<&TransitGateway> {
        self.tgws
            .values()
            .flatten()
            .find(|t| t.transit_gateway_id == tgw_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(
        id: &str,
        vpc: &str,
        region: &str,
        segment: Option<&str>,
        nfg: Option<&str>,
    ) -> Attachment {
        Attachment {
            attachment_id: id.to_string(),
            resource_arn: format!("arn:aws:ec2:{}:111122223333:vpc/{}", region, vpc),
            edge_location: region.to_string(),
            segment_name: segment.map(str::to_string),
            network_function_group_name: nfg.map(str::to_string),
            state: "AVAILABLE".to_string(),
            tags: vec![],
        }
    }

    #[test]
    fn test_route_from_raw_target_priority() {
        let raw = RawRoute {
            destination_cidr_block: Some("0.0.0.0/0".to_string()),
            nat_gateway_id: Some("nat-1".to_string()),
            transit_gateway_id: Some("tgw-1".to_string()),
            ..Default::default()
        };
        let route = Route::from_raw(&raw);
        assert_eq!(route.target, "nat-1");
        assert_eq!(route.state, RouteState::Active);

        let local = Route::from_raw(&RawRoute {
            destination_cidr_block: Some("10.0.0.0/16".to_string()),
            ..Default::default()
        });
        assert!(local.is_local());
    }

    #[test]
    fn test_route_from_raw_ipv6_and_blackhole() {
        let raw = RawRoute {
            destination_ipv6_cidr_block: Some("2001:db8::/32".to_string()),
            network_interface_id: Some("eni-9".to_string()),
            state: Some("blackhole".to_string()),
            ..Default::default()
        };
        let route = Route::from_raw(&raw);
        assert_eq!(route.destination, "2001:db8::/32");
        assert_eq!(route.state, RouteState::Blackhole);
    }

    #[test]
    fn test_policy_parse_send_via() {
        let doc = r#"{
            "version": "2021.12",
            "segments": [{"name": "prod"}, {"name": "dev"}],
            "segment-actions": [
                {"action": "share", "segment": "prod", "share-with": ["dev"]},
                {
                    "action": "send-via",
                    "segment": "prod",
                    "when-sent-to": {"segments": ["dev"]},
                    "via": {"network-function-groups": ["inspection"]}
                }
            ]
        }"#;
        let policy = CorePolicy::parse(doc).unwrap();
        assert_eq!(policy.segments.len(), 2);
        assert_eq!(policy.send_via_group("prod", Some("dev")), Some("inspection"));
        assert_eq!(policy.send_via_group("dev", Some("prod")), None);
        assert_eq!(policy.send_via_group("prod", None), None);
    }

    #[test]
    fn test_policy_wildcard_selector() {
        let doc = r#"{
            "segment-actions": [{
                "action": "send-via",
                "segment": "shared",
                "when-sent-to": {"segments": "*"},
                "via": {"network-function-groups": ["egress-fw", "backup-fw"]}
            }]
        }"#;
        let policy = CorePolicy::parse(doc).unwrap();
        assert_eq!(policy.send_via_group("shared", Some("anything")), Some("egress-fw"));
        assert_eq!(policy.send_via_group("shared", None), Some("egress-fw"));
    }

    #[test]
    fn test_policy_empty_document() {
        assert_eq!(CorePolicy::parse("").unwrap(), CorePolicy::default());
        assert_eq!(CorePolicy::parse("{}").unwrap(), CorePolicy::default());
        assert!(CorePolicy::parse("not json").is_err());
    }

    #[test]
    fn test_segment_lookup_requires_region_match() {
        let mut topology = NetworkTopology::new("111122223333", vec!["eu-west-1".to_string()]);
        topology.attachments = vec![
            attachment("attachment-1", "vpc-a", "eu-west-1", Some("prod"), None),
            attachment("attachment-2", "vpc-fw", "eu-west-1", None, Some("inspection")),
        ];

        assert_eq!(topology.segment_for("vpc-a", "eu-west-1"), Some("prod"));
        assert_eq!(topology.segment_for("vpc-a", "us-east-1"), None);
        assert_eq!(
            topology
                .inspection_attachment("inspection", "eu-west-1")
                .map(|a| a.attachment_id.as_str()),
            Some("attachment-2")
        );
        assert!(topology.inspection_attachment("inspection", "us-east-1").is_none());
    }

    #[test]
    fn test_route_table_main_fallback() {
        let mut topology = NetworkTopology::new("111122223333", vec![]);
        topology
            .route_tables
            .insert(main_route_table_key("vpc-a"), RouteTable::unknown("vpc-a"));
        let mut subnet_rt = RouteTable::unknown("vpc-a");
        subnet_rt.id = "rtb-subnet".to_string();
        topology.route_tables.insert("subnet-1".to_string(), subnet_rt);

        assert_eq!(topology.route_table_for("subnet-1", "vpc-a").unwrap().id, "rtb-subnet");
        assert_eq!(topology.route_table_for("subnet-2", "vpc-a").unwrap().id, "unknown");
        assert!(topology.route_table_for("subnet-2", "vpc-b").is_none());
    }

    #[test]
    fn test_address_index_serializes_as_map() {
        let index: AddressIndex = [(
            "10.0.1.5".to_string(),
            InterfaceRecord {
                interface_id: "eni-1".to_string(),
                vpc_id: "vpc-a".to_string(),
                subnet_id: "subnet-1".to_string(),
                region: "eu-west-1".to_string(),
                security_groups: vec!["sg-1".to_string()],
            },
        )]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["10.0.1.5"]["interface_id"], "eni-1");

        let restored: AddressIndex = serde_json::from_value(json).unwrap();
        assert_eq!(restored.get("10.0.1.5").unwrap().vpc_id, "vpc-a");
        assert!(!restored.contains("10.0.1.6"));
    }

    #[test]
    fn test_cloned_index_is_independent() {
        let index = AddressIndex::default();
        let copy = index.clone();
        index.insert(
            "10.0.0.1".to_string(),
            InterfaceRecord {
                interface_id: "eni-1".to_string(),
                vpc_id: String::new(),
                subnet_id: String::new(),
                region: "eu-west-1".to_string(),
                security_groups: vec![],
            },
        );
        assert_eq!(index.len(), 1);
        assert!(copy.is_empty());
    }
}
