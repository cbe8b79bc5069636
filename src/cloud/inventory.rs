//! Offline inventory backend.
//!
//! Serves a JSON export of an account's network resources through [`CloudApi`],
//! with the same pagination contract as the live API.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{
    Attachment, CloudApi, CoreNetwork, GlobalNetwork, NetworkInterface, Page, PolicyDocument,
    RawRouteTable, TgwRouteTable, TransitGateway, Vpc,
};

/// Default number of items per page for paginated listings
const DEFAULT_PAGE_SIZE: usize = 50;

/// Resources of a single region
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionInventory {
    #[serde(default)]
    pub transit_gateways: Vec<TransitGateway>,
    #[serde(default)]
    pub tgw_route_tables: Vec<TgwRouteTable>,
    #[serde(default)]
    pub vpcs: Vec<Vpc>,
    #[serde(default)]
    pub route_tables: Vec<RawRouteTable>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

/// Exported account inventory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub account_id: String,
    #[serde(default)]
    pub global_networks: Vec<GlobalNetwork>,
    #[serde(default)]
    pub core_networks: Vec<CoreNetwork>,
    /// core network id -> live policy
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyDocument>,
    /// core network id -> attachments
    #[serde(default)]
    pub attachments: BTreeMap<String, Vec<Attachment>>,
    #[serde(default)]
    pub regions: BTreeMap<String, RegionInventory>,
}

/// [`CloudApi`] implementation over an [`Inventory`]
pub struct InventoryApi {
    inventory: Inventory,
    page_size: usize,
}

impl InventoryApi {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Load an inventory JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read inventory {}", path.display()))?;
        let inventory: Inventory = serde_json::from_str(&data)
            .with_context(|| format!("invalid inventory {}", path.display()))?;
        Ok(Self::new(inventory))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn region(&self, region: &str) -> Result<&RegionInventory> {
        self.inventory
            .regions
            .get(region)
            .ok_or_else(|| anyhow!("unknown region: {}", region))
    }

    fn paginate<T: Clone>(&self, items: &[T], next_token: Option<String>) -> Result<Page<T>> {
        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid pagination token: {}", token))?,
            None => 0,
        };
        let end = (start + self.page_size).min(items.len());
        let items_page = items.get(start..end).unwrap_or_default().to_vec();
        let next_token = (end < items.len()).then(|| end.to_string());
        Ok(Page {
            items: items_page,
            next_token,
        })
    }
}

#[async_trait]
impl CloudApi for InventoryApi {
    async fn account_id(&self) -> Result<String> {
        Ok(self.inventory.account_id.clone())
    }

    async fn list_regions(&self) -> Result<Vec<String>> {
        Ok(self.inventory.regions.keys().cloned().collect())
    }

    async fn list_global_networks(&self) -> Result<Vec<GlobalNetwork>> {
        Ok(self.inventory.global_networks.clone())
    }

    async fn list_core_networks(&self) -> Result<Vec<CoreNetwork>> {
        Ok(self.inventory.core_networks.clone())
    }

    async fn get_core_network_policy(&self, core_network_id: &str) -> Result<PolicyDocument> {
        self.inventory
            .policies
            .get(core_network_id)
            .cloned()
            .ok_or_else(|| anyhow!("no policy for core network {}", core_network_id))
    }

    async fn list_attachments(
        &self,
        core_network_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<Attachment>> {
        let attachments = self
            .inventory
            .attachments
            .get(core_network_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        self.paginate(attachments, next_token)
    }

    async fn list_transit_gateways(&self, region: &str) -> Result<Vec<TransitGateway>> {
        Ok(self.region(region)?.transit_gateways.clone())
    }

    async fn list_transit_gateway_route_tables(
        &self,
        region: &str,
        transit_gateway_id: &str,
    ) -> Result<Vec<TgwRouteTable>> {
        Ok(self
            .region(region)?
            .tgw_route_tables
            .iter()
            .filter(|rt| rt.transit_gateway_id == transit_gateway_id)
            .cloned()
            .collect())
    }

    async fn list_vpcs(&self, region: &str) -> Result<Vec<Vpc>> {
        Ok(self.region(region)?.vpcs.clone())
    }

    async fn list_route_tables(
        &self,
        region: &str,
        vpc_ids: &[String],
    ) -> Result<Vec<RawRouteTable>> {
        Ok(self
            .region(region)?
            .route_tables
            .iter()
            .filter(|rt| vpc_ids.contains(&rt.vpc_id))
            .cloned()
            .collect())
    }

    async fn list_network_interfaces(
        &self,
        region: &str,
        next_token: Option<String>,
    ) -> Result<Page<NetworkInterface>> {
        let region = self.region(region)?;
        self.paginate(&region.network_interfaces, next_token)
    }

    async fn find_network_interface(
        &self,
        region: &str,
        ip: &str,
    ) -> Result<Option<NetworkInterface>> {
        Ok(self
            .region(region)?
            .network_interfaces
            .iter()
            .find(|eni| eni.private_ip_addresses.iter().any(|a| a == ip))
            .cloned())
    }
}
