//! QEMU virtual machine endpoints, scoped to one node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::client::Client;
use super::common::{int_bool, string_or_u32, string_or_u64};
use super::tasks::Upid;
use crate::error::Result;

/// QEMU API for one node.
pub struct QemuApi<'a> {
    client: &'a Client,
    node: String,
}

impl<'a> QemuApi<'a> {
    pub fn new(client: &'a Client, node: &str) -> Self {
        Self {
            client,
            node: node.to_string(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// GET /api2/json/nodes/{node}/qemu
    pub async fn list(&self) -> Result<Vec<VmSummary>> {
        let path = format!("/api2/json/nodes/{}/qemu", self.node);
        self.client.get(&path).await
    }

    /// GET /api2/json/nodes/{node}/qemu/{vmid}/config
    pub async fn config(&self, vmid: u32) -> Result<VmConfig> {
        let path = format!("/api2/json/nodes/{}/qemu/{}/config", self.node, vmid);
        self.client.get(&path).await
    }

    /// POST /api2/json/nodes/{node}/qemu
    pub async fn create(&self, request: &CreateVmRequest) -> Result<Upid> {
        let path = format!("/api2/json/nodes/{}/qemu", self.node);
        self.client.post(&path, request).await
    }

    /// POST /api2/json/nodes/{node}/qemu/{vmid}/config
    ///
    /// Proxmox returns a UPID only when the change spawned a worker task;
    /// synchronous changes answer with null.
    pub async fn update_config(
        &self,
        vmid: u32,
        request: &UpdateVmRequest,
    ) -> Result<Option<Upid>> {
        let path = format!("/api2/json/nodes/{}/qemu/{}/config", self.node, vmid);
        self.client.post(&path, request).await
    }

    /// DELETE /api2/json/nodes/{node}/qemu/{vmid}
    pub async fn delete(&self, vmid: u32, purge: bool) -> Result<Upid> {
        let path = if purge {
            format!("/api2/json/nodes/{}/qemu/{}?purge=1", self.node, vmid)
        } else {
            format!("/api2/json/nodes/{}/qemu/{}", self.node, vmid)
        };
        self.client.delete(&path).await
    }

    /// POST /api2/json/nodes/{node}/qemu/{vmid}/status/{action}
    pub async fn power(&self, vmid: u32, action: PowerAction) -> Result<Upid> {
        let path = format!(
            "/api2/json/nodes/{}/qemu/{}/status/{}",
            self.node,
            vmid,
            action.endpoint()
        );
        self.client.post(&path, &()).await
    }

    /// GET /api2/json/nodes/{node}/qemu/{vmid}/status/current
    pub async fn status(&self, vmid: u32) -> Result<VmRuntimeStatus> {
        let path = format!(
            "/api2/json/nodes/{}/qemu/{}/status/current",
            self.node, vmid
        );
        self.client.get(&path).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Shutdown,
    Reset,
    Suspend,
    Resume,
}

impl PowerAction {
    pub fn endpoint(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Shutdown => "shutdown",
            PowerAction::Reset => "reset",
            PowerAction::Suspend => "suspend",
            PowerAction::Resume => "resume",
        }
    }
}

/// Item in the VM list response.
#[derive(Debug, Clone, Deserialize)]
pub struct VmSummary {
    pub vmid: u32,
    pub name: Option<String>,
    pub status: String,
    pub cpus: Option<u32>,
    pub maxmem: Option<u64>,
    pub mem: Option<u64>,
    pub uptime: Option<u64>,
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "int_bool::deserialize")]
    pub template: Option<bool>,
}

/// VM configuration as returned by the config endpoint.
///
/// Only the attributes this adapter interprets are typed; everything else,
/// including disk and network device strings, lands in `extra` and must be
/// carried through read-modify-write cycles untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct VmConfig {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_u32::deserialize")]
    pub cores: Option<u32>,
    #[serde(default, deserialize_with = "string_or_u32::deserialize")]
    pub sockets: Option<u32>,
    /// Memory in MiB. Proxmox 8 reports this as a string.
    #[serde(default, deserialize_with = "string_or_u64::deserialize")]
    pub memory: Option<u64>,
    pub ostype: Option<String>,
    pub digest: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Request body for VM creation. Disk and network devices go into the
/// flattened map under their slot keys (`scsi0`, `net0`, ...).
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateVmRequest {
    pub vmid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostype: Option<String>,
    #[serde(flatten)]
    pub devices: BTreeMap<String, String>,
}

/// Request body for config updates; only set fields are transmitted.
#[derive(Debug, Clone, Serialize, Default)]
pub struct UpdateVmRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Current runtime status of a VM.
#[derive(Debug, Clone, Deserialize)]
pub struct VmRuntimeStatus {
    pub status: String,
    pub qmpstatus: Option<String>,
    pub pid: Option<u32>,
    pub uptime: Option<u64>,
    pub cpus: Option<u32>,
    pub mem: Option<u64>,
    pub maxmem: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::test_client;
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn list_parses_template_flag() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api2/json/nodes/pve1/qemu")
            .with_body(
                r#"{"data":[
                    {"vmid":100,"name":"web1","status":"running","cpus":2,"maxmem":2147483648},
                    {"vmid":9000,"name":"debian-tpl","status":"stopped","template":1}
                ]}"#,
            )
            .create_async()
            .await;

        let client = test_client(&server.url());
        let vms = client.nodes().node("pve1").qemu().list().await.unwrap();
        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0].vmid, 100);
        assert_eq!(vms[0].template, None);
        assert_eq!(vms[1].template, Some(true));
    }

    #[tokio::test]
    async fn config_preserves_unknown_fields() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api2/json/nodes/pve1/qemu/100/config")
            .with_body(
                r#"{"data":{
                    "name":"web1","cores":2,"memory":"2048","ostype":"l26",
                    "scsi0":"local-lvm:vm-100-disk-0,size=20G",
                    "net0":"virtio=DE:AD:BE:EF:00:01,bridge=vmbr0",
                    "smbios1":"uuid=9a1b2c3d","vga":"std"
                }}"#,
            )
            .create_async()
            .await;

        let client = test_client(&server.url());
        let config = client
            .nodes()
            .node("pve1")
            .qemu()
            .config(100)
            .await
            .unwrap();
        assert_eq!(config.name.as_deref(), Some("web1"));
        assert_eq!(config.cores, Some(2));
        assert_eq!(config.memory, Some(2048));
        assert!(config.extra.contains_key("scsi0"));
        assert!(config.extra.contains_key("smbios1"));
        assert!(config.extra.contains_key("vga"));
    }

    #[tokio::test]
    async fn create_serializes_devices_inline() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api2/json/nodes/pve1/qemu")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJsonString(r#"{"vmid":100,"name":"web1"}"#.to_string()),
                Matcher::PartialJsonString(r#"{"scsi0":"local-lvm:20"}"#.to_string()),
                Matcher::PartialJsonString(r#"{"net0":"virtio,bridge=vmbr0"}"#.to_string()),
            ]))
            .with_body(r#"{"data":"UPID:pve1:0000C3F2:0012AB34:663B9A21:qmcreate:100:root@pam:"}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let mut request = CreateVmRequest {
            vmid: 100,
            name: Some("web1".to_string()),
            cores: Some(2),
            memory: Some(2048),
            ..Default::default()
        };
        request
            .devices
            .insert("scsi0".to_string(), "local-lvm:20".to_string());
        request
            .devices
            .insert("net0".to_string(), "virtio,bridge=vmbr0".to_string());

        let upid = client
            .nodes()
            .node("pve1")
            .qemu()
            .create(&request)
            .await
            .unwrap();
        assert_eq!(upid.node(), Some("pve1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn update_without_worker_task_returns_none() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api2/json/nodes/pve1/qemu/100/config")
            .match_body(Matcher::JsonString(r#"{"memory":4096}"#.to_string()))
            .with_body(r#"{"data":null}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let request = UpdateVmRequest {
            memory: Some(4096),
            ..Default::default()
        };
        let upid = client
            .nodes()
            .node("pve1")
            .qemu()
            .update_config(100, &request)
            .await
            .unwrap();
        assert!(upid.is_none());
    }

    #[tokio::test]
    async fn delete_with_purge() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api2/json/nodes/pve1/qemu/100?purge=1")
            .with_body(r#"{"data":"UPID:pve1:0000C3F2:0012AB34:663B9A21:qmdestroy:100:root@pam:"}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let upid = client
            .nodes()
            .node("pve1")
            .qemu()
            .delete(100, true)
            .await
            .unwrap();
        assert!(upid.as_str().contains("qmdestroy"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn power_actions_map_to_endpoints() {
        let mut server = Server::new_async().await;
        for action in [
            PowerAction::Start,
            PowerAction::Stop,
            PowerAction::Shutdown,
            PowerAction::Reset,
            PowerAction::Suspend,
            PowerAction::Resume,
        ] {
            let path = format!("/api2/json/nodes/pve1/qemu/100/status/{}", action.endpoint());
            let mock = server
                .mock("POST", path.as_str())
                .with_body(
                    r#"{"data":"UPID:pve1:0000C3F2:0012AB34:663B9A21:qmpower:100:root@pam:"}"#,
                )
                .create_async()
                .await;

            let client = test_client(&server.url());
            let upid = client
                .nodes()
                .node("pve1")
                .qemu()
                .power(100, action)
                .await
                .unwrap();
            assert_eq!(upid.node(), Some("pve1"));
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn status_reports_qmpstatus() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api2/json/nodes/pve1/qemu/100/status/current")
            .with_body(r#"{"data":{"status":"running","qmpstatus":"paused","pid":4242}}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let status = client
            .nodes()
            .node("pve1")
            .qemu()
            .status(100)
            .await
            .unwrap();
        assert_eq!(status.status, "running");
        assert_eq!(status.qmpstatus.as_deref(), Some("paused"));
    }
}
