//! Read-only placement queries: nodes, storages, bridges, templates.
//!
//! Every query fetches fresh state; cluster contents change externally, so
//! nothing is cached beyond one logical operation. Cluster-wide aggregation
//! keeps working when individual nodes are unreachable.

use crate::api::nodes::{NetworkInfo, NodeInfo, StorageInfo};
use crate::api::Client;
use crate::error::Result;

/// A catalog entry paired with the node it was observed on.
#[derive(Debug, Clone)]
pub struct Placed<T> {
    pub node: String,
    pub entry: T,
}

/// A provisioning source: either a template-flagged VM or an ISO volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    Vm {
        node: String,
        vmid: u32,
        name: Option<String>,
    },
    Iso {
        node: String,
        storage: String,
        volid: String,
    },
}

pub struct Catalog {
    client: Client,
}

impl Catalog {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.client.nodes().list().await
    }

    pub async fn storages(&self, node: &str) -> Result<Vec<StorageInfo>> {
        self.client.nodes().node(node).storages().await
    }

    pub async fn networks(&self, node: &str) -> Result<Vec<NetworkInfo>> {
        self.client.nodes().node(node).networks().await
    }

    /// Template VMs plus ISO volumes available on one node. A storage whose
    /// content listing fails is skipped with a warning so one dead storage
    /// does not hide the rest.
    pub async fn templates(&self, node: &str) -> Result<Vec<Template>> {
        let node_api = self.client.nodes().node(node);
        let mut templates = Vec::new();

        for vm in node_api.qemu().list().await? {
            if vm.template.unwrap_or(false) {
                templates.push(Template::Vm {
                    node: node.to_string(),
                    vmid: vm.vmid,
                    name: vm.name,
                });
            }
        }

        for storage in node_api.storages().await? {
            if !storage.supports_content("iso") {
                continue;
            }
            match node_api.storage_content(&storage.storage, Some("iso")).await {
                Ok(volumes) => {
                    for volume in volumes {
                        templates.push(Template::Iso {
                            node: node.to_string(),
                            storage: storage.storage.clone(),
                            volid: volume.volid,
                        });
                    }
                }
                Err(error) => {
                    tracing::warn!(node, storage = %storage.storage, %error,
                        "skipping unreachable storage in template catalog");
                }
            }
        }

        Ok(templates)
    }

    /// Storages across the whole cluster. Unreachable nodes are omitted with
    /// a warning so the catalog stays usable on a degraded cluster.
    pub async fn storages_all(&self) -> Result<Vec<Placed<StorageInfo>>> {
        let mut out = Vec::new();
        for node in self.nodes().await? {
            match self.storages(&node.node).await {
                Ok(storages) => out.extend(storages.into_iter().map(|entry| Placed {
                    node: node.node.clone(),
                    entry,
                })),
                Err(error) => {
                    tracing::warn!(node = %node.node, %error,
                        "skipping unreachable node in storage catalog");
                }
            }
        }
        Ok(out)
    }

    /// Bridges across the whole cluster; same degradation rule.
    pub async fn networks_all(&self) -> Result<Vec<Placed<NetworkInfo>>> {
        let mut out = Vec::new();
        for node in self.nodes().await? {
            match self.networks(&node.node).await {
                Ok(networks) => out.extend(networks.into_iter().map(|entry| Placed {
                    node: node.node.clone(),
                    entry,
                })),
                Err(error) => {
                    tracing::warn!(node = %node.node, %error,
                        "skipping unreachable node in network catalog");
                }
            }
        }
        Ok(out)
    }

    /// Templates across the whole cluster; same degradation rule.
    pub async fn templates_all(&self) -> Result<Vec<Template>> {
        let mut out = Vec::new();
        for node in self.nodes().await? {
            match self.templates(&node.node).await {
                Ok(templates) => out.extend(templates),
                Err(error) => {
                    tracing::warn!(node = %node.node, %error,
                        "skipping unreachable node in template catalog");
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_helpers::test_client;
    use mockito::Server;

    #[tokio::test]
    async fn degraded_node_is_skipped_in_aggregation() {
        let mut server = Server::new_async().await;
        let _nodes = server
            .mock("GET", "/api2/json/nodes")
            .with_body(
                r#"{"data":[
                    {"node":"pve1","status":"online"},
                    {"node":"pve2","status":"online"}
                ]}"#,
            )
            .create_async()
            .await;
        let _pve1 = server
            .mock("GET", "/api2/json/nodes/pve1/storage")
            .with_body(r#"{"data":[{"storage":"local-lvm","type":"lvmthin","avail":1000}]}"#)
            .create_async()
            .await;
        // pve2 unreachable: 500 twice because server errors get one retry
        let _pve2 = server
            .mock("GET", "/api2/json/nodes/pve2/storage")
            .with_status(500)
            .with_body("node offline")
            .expect(2)
            .create_async()
            .await;

        let catalog = Catalog::new(test_client(&server.url()));
        let storages = catalog.storages_all().await.unwrap();
        assert_eq!(storages.len(), 1);
        assert_eq!(storages[0].node, "pve1");
        assert_eq!(storages[0].entry.storage, "local-lvm");
    }

    #[tokio::test]
    async fn templates_combine_vms_and_isos() {
        let mut server = Server::new_async().await;
        let _qemu = server
            .mock("GET", "/api2/json/nodes/pve1/qemu")
            .with_body(
                r#"{"data":[
                    {"vmid":100,"name":"web1","status":"running"},
                    {"vmid":9000,"name":"debian-tpl","status":"stopped","template":1}
                ]}"#,
            )
            .create_async()
            .await;
        let _storages = server
            .mock("GET", "/api2/json/nodes/pve1/storage")
            .with_body(
                r#"{"data":[
                    {"storage":"local-lvm","type":"lvmthin","content":"images"},
                    {"storage":"cephfs","type":"cephfs","content":"iso"}
                ]}"#,
            )
            .create_async()
            .await;
        let _content = server
            .mock("GET", "/api2/json/nodes/pve1/storage/cephfs/content?content=iso")
            .with_body(r#"{"data":[{"volid":"cephfs:iso/debian-12.iso","content":"iso"}]}"#)
            .create_async()
            .await;

        let catalog = Catalog::new(test_client(&server.url()));
        let templates = catalog.templates("pve1").await.unwrap();
        assert_eq!(templates.len(), 2);
        assert!(matches!(
            templates[0],
            Template::Vm { vmid: 9000, .. }
        ));
        assert!(matches!(
            templates[1],
            Template::Iso { ref volid, .. } if volid == "cephfs:iso/debian-12.iso"
        ));
    }
}
