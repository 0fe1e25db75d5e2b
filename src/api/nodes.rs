//! Node enumeration and node-scoped placement resources.

use serde::Deserialize;

use super::client::Client;
use super::common::{int_bool, ApiQueryParams};
use super::qemu::QemuApi;
use crate::error::Result;

pub struct NodesApi<'a> {
    client: &'a Client,
}

impl<'a> NodesApi<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// GET /api2/json/nodes
    pub async fn list(&self) -> Result<Vec<NodeInfo>> {
        self.client.get("/api2/json/nodes").await
    }

    pub fn node(&self, node: &str) -> NodeApi<'a> {
        NodeApi {
            client: self.client,
            node: node.to_string(),
        }
    }
}

pub struct NodeApi<'a> {
    client: &'a Client,
    node: String,
}

impl<'a> NodeApi<'a> {
    pub fn qemu(&self) -> QemuApi<'a> {
        QemuApi::new(self.client, &self.node)
    }

    /// GET /api2/json/nodes/{node}/storage
    pub async fn storages(&self) -> Result<Vec<StorageInfo>> {
        let path = format!("/api2/json/nodes/{}/storage", self.node);
        self.client.get(&path).await
    }

    /// GET /api2/json/nodes/{node}/network?type=any_bridge
    pub async fn networks(&self) -> Result<Vec<NetworkInfo>> {
        let path = format!("/api2/json/nodes/{}/network?type=any_bridge", self.node);
        self.client.get(&path).await
    }

    /// GET /api2/json/nodes/{node}/storage/{storage}/content
    pub async fn storage_content(
        &self,
        storage: &str,
        content: Option<&str>,
    ) -> Result<Vec<VolumeInfo>> {
        let query = ApiQueryParams::new()
            .add_optional("content", content)
            .to_query_string();
        let path = format!(
            "/api2/json/nodes/{}/storage/{}/content{}",
            self.node, storage, query
        );
        self.client.get(&path).await
    }
}

/// Snapshot of one cluster node; refreshed per catalog query, never cached.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub node: String,
    pub status: String,
    pub cpu: Option<f64>,
    pub maxcpu: Option<u32>,
    pub mem: Option<u64>,
    pub maxmem: Option<u64>,
    pub disk: Option<u64>,
    pub maxdisk: Option<u64>,
    pub uptime: Option<u64>,
}

impl NodeInfo {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

/// Storage as seen from one node; used only for placement decisions.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageInfo {
    pub storage: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "int_bool::deserialize")]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "int_bool::deserialize")]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "int_bool::deserialize")]
    pub shared: Option<bool>,
    pub avail: Option<u64>,
    pub total: Option<u64>,
    pub used: Option<u64>,
    /// Comma-separated list of content types (`images,iso,...`).
    pub content: Option<String>,
}

impl StorageInfo {
    pub fn supports_content(&self, kind: &str) -> bool {
        self.content
            .as_deref()
            .map(|c| c.split(',').any(|entry| entry.trim() == kind))
            .unwrap_or(false)
    }
}

/// A bridge interface VM NICs can attach to.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    pub iface: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "int_bool::deserialize")]
    pub active: Option<bool>,
    #[serde(
        rename = "bridge_vlan_aware",
        default,
        deserialize_with = "int_bool::deserialize"
    )]
    pub vlan_aware: Option<bool>,
    pub comments: Option<String>,
}

/// A volume on a storage, e.g. an ISO image.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeInfo {
    pub volid: String,
    pub content: Option<String>,
    pub size: Option<u64>,
    pub format: Option<String>,
}
