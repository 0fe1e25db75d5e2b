//! Cluster-wide queries: vmid allocation and the VM resource index.

use serde::Deserialize;

use super::client::Client;
use super::common::int_bool;
use crate::error::{Error, Result};

pub struct ClusterApi<'a> {
    client: &'a Client,
}

impl<'a> ClusterApi<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// GET /api2/json/cluster/nextid
    ///
    /// The returned id is a suggestion, not a reservation; concurrent callers
    /// can race and must handle an "already exists" rejection on create.
    pub async fn next_id(&self) -> Result<u32> {
        let id: String = self.client.get("/api2/json/cluster/nextid").await?;
        id.parse::<u32>()
            .map_err(|_| Error::Parse(format!("unexpected nextid value: {id}")))
    }

    /// GET /api2/json/cluster/resources?type=vm, filtered to QEMU guests.
    ///
    /// This is the one cluster-wide index mapping a vmid to its node.
    pub async fn vm_resources(&self) -> Result<Vec<VmResource>> {
        let resources: Vec<VmResource> = self
            .client
            .get("/api2/json/cluster/resources?type=vm")
            .await?;
        Ok(resources
            .into_iter()
            .filter(|r| r.kind == "qemu")
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmResource {
    pub vmid: u32,
    pub node: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "int_bool::deserialize")]
    pub template: Option<bool>,
}
