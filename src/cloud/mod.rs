//! Cloud API seam.
//!
//! The tracer never talks to a provider SDK directly. Everything it needs from
//! the control plane goes through [`CloudApi`], so each call can fail on its own
//! without taking the rest of a discovery run down with it.

pub mod inventory;

pub use inventory::{Inventory, InventoryApi, RegionInventory};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Key/value resource tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Look up the `Name` tag in a tag list
pub fn name_tag(tags: &[Tag]) -> Option<&str> {
    tags.iter()
        .find(|t| t.key == "Name")
        .map(|t| t.value.as_str())
}

/// One page of a paginated listing
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// Backbone global network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalNetwork {
    pub global_network_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Backbone core network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreNetwork {
    pub core_network_id: String,
    #[serde(default)]
    pub global_network_id: String,
    #[serde(default)]
    pub state: String,
}

/// Live routing policy of a core network, as returned by the API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version_id: Option<u64>,
    /// Raw JSON policy text
    pub document: String,
}

/// Attachment of a resource (VPC, VPN, ...) to a core network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub attachment_id: String,
    #[serde(default)]
    pub resource_arn: String,
    #[serde(default)]
    pub edge_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_function_group_name: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Regional transit router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitGateway {
    pub transit_gateway_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Route table owned by a transit router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TgwRouteTable {
    pub route_table_id: String,
    pub transit_gateway_id: String,
    #[serde(default)]
    pub default_association: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Virtual network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vpc {
    pub vpc_id: String,
    #[serde(default)]
    pub cidr_block: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Route table association with a subnet, or the VPC main marker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Association {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub main: bool,
}

/// Raw route entry; exactly one target field is normally set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRoute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_cidr_block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ipv6_cidr_block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_network_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Raw VPC route table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRouteTable {
    pub route_table_id: String,
    pub vpc_id: String,
    #[serde(default)]
    pub routes: Vec<RawRoute>,
    #[serde(default)]
    pub associations: Vec<Association>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Network interface with its private addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub network_interface_id: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub private_ip_addresses: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
}

/// Control-plane operations used by discovery, staleness checks and the tracer
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Account the credentials resolve to
    async fn account_id(&self) -> Result<String>;

    /// Regions enabled for the account
    async fn list_regions(&self) -> Result<Vec<String>>;

    async fn list_global_networks(&self) -> Result<Vec<GlobalNetwork>>;

    async fn list_core_networks(&self) -> Result<Vec<CoreNetwork>>;

    async fn get_core_network_policy(&self, core_network_id: &str) -> Result<PolicyDocument>;

    async fn list_attachments(
        &self,
        core_network_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<Attachment>>;

    async fn list_transit_gateways(&self, region: &str) -> Result<Vec<TransitGateway>>;

    async fn list_transit_gateway_route_tables(
        &self,
        region: &str,
        transit_gateway_id: &str,
    ) -> Result<Vec<TgwRouteTable>>;

    async fn list_vpcs(&self, region: &str) -> Result<Vec<Vpc>>;

    /// Route tables belonging to any of `vpc_ids`
    async fn list_route_tables(&self, region: &str, vpc_ids: &[String])
    -> Result<Vec<RawRouteTable>>;

    async fn list_network_interfaces(
        &self,
        region: &str,
        next_token: Option<String>,
    ) -> Result<Page<NetworkInterface>>;

    /// Interface owning `ip` in `region`, if any
    async fn find_network_interface(
        &self,
        region: &str,
        ip: &str,
    ) -> Result<Option<NetworkInterface>>;
}
