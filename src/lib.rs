//! Proxmox VE compute adapter.
//!
//! Drives QEMU guest lifecycle on a Proxmox VE cluster over its HTTP API:
//! create, update, destroy, and power control, plus catalog queries for the
//! placement resources (nodes, storages, bridges, templates) a host needs
//! when offering VM provisioning.
//!
//! The entry point is [`ProxmoxCompute`], which implements the
//! [`ComputeResource`] trait:
//!
//! ```no_run
//! use proxmox_compute::{ClusterConfig, ComputeResource, Credentials, ProxmoxCompute};
//!
//! # async fn demo() -> proxmox_compute::Result<()> {
//! let config = ClusterConfig::new(
//!     "https://pve.example.com:8006",
//!     Credentials::token("user@pam!mytoken=aaaa-bbbb"),
//! )?;
//! let compute = ProxmoxCompute::new(&config)?;
//! compute.test_connection().await?;
//! for vm in compute.list_vms().await? {
//!     println!("{} on {}: {}", vm.vmid, vm.node, vm.power);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Mutations block until the underlying Proxmox task finishes, so a
//! successful return means the cluster reflects the requested state.

pub mod api;
pub mod capability;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod poller;
pub mod reconcile;

use async_trait::async_trait;

pub use crate::api::{Client, PowerAction, Upid, VersionInfo};
pub use crate::capability::{descriptor, vm_facts, CapabilityDescriptor, OperationKind};
pub use crate::catalog::{Catalog, Placed, Template};
pub use crate::config::{ClusterConfig, Credentials, PollConfig, RetryConfig};
pub use crate::error::{Error, Result};
pub use crate::lifecycle::{
    DiskSpec, LifecycleController, NicSpec, UpdateOutcome, VmDelta, VmSpec,
};
pub use crate::poller::{TaskOutcome, TaskPoller};
pub use crate::reconcile::{
    DiskAttachment, NicAttachment, PowerState, VmHandle, VmRecord,
};

pub use crate::api::nodes::{NetworkInfo, NodeInfo, StorageInfo, VolumeInfo};

/// The operations a host needs from a compute backend. Implemented here for
/// Proxmox VE; mockable at the seam for host-side tests.
#[async_trait]
pub trait ComputeResource: Send + Sync {
    /// Cheap liveness and credential check.
    async fn test_connection(&self) -> Result<VersionInfo>;

    async fn list_vms(&self) -> Result<Vec<VmHandle>>;

    /// Full record, or None when the VM no longer exists.
    async fn find_vm(&self, vmid: u32) -> Result<Option<VmRecord>>;

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmRecord>;

    async fn update_vm(&self, vmid: u32, delta: &VmDelta) -> Result<UpdateOutcome>;

    /// Idempotent: destroying an absent VM succeeds.
    async fn destroy_vm(&self, vmid: u32) -> Result<()>;

    /// Returns the power state observed after the transition settled.
    async fn power(&self, vmid: u32, action: PowerAction) -> Result<PowerState>;

    async fn available_nodes(&self) -> Result<Vec<NodeInfo>>;

    async fn available_storages(&self, node: &str) -> Result<Vec<StorageInfo>>;

    async fn available_networks(&self, node: &str) -> Result<Vec<NetworkInfo>>;

    async fn available_templates(&self, node: &str) -> Result<Vec<Template>>;
}

/// A connected Proxmox VE cluster.
pub struct ProxmoxCompute {
    client: Client,
    catalog: Catalog,
    lifecycle: LifecycleController,
}

impl ProxmoxCompute {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let client = Client::new(config)?;
        let poller = TaskPoller::new(&config.poll);
        Ok(Self {
            catalog: Catalog::new(client.clone()),
            lifecycle: LifecycleController::new(client.clone(), poller),
            client,
        })
    }

    /// Build from `PROXMOX_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(&ClusterConfig::from_env()?)
    }

    /// The underlying API client, for calls outside the trait surface.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ComputeResource for ProxmoxCompute {
    async fn test_connection(&self) -> Result<VersionInfo> {
        self.client.version().await
    }

    async fn list_vms(&self) -> Result<Vec<VmHandle>> {
        self.lifecycle.list().await
    }

    async fn find_vm(&self, vmid: u32) -> Result<Option<VmRecord>> {
        self.lifecycle.find(vmid).await
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmRecord> {
        self.lifecycle.create(spec).await
    }

    async fn update_vm(&self, vmid: u32, delta: &VmDelta) -> Result<UpdateOutcome> {
        self.lifecycle.update(vmid, delta).await
    }

    async fn destroy_vm(&self, vmid: u32) -> Result<()> {
        self.lifecycle.destroy(vmid).await
    }

    async fn power(&self, vmid: u32, action: PowerAction) -> Result<PowerState> {
        self.lifecycle.power(vmid, action).await
    }

    async fn available_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.catalog.nodes().await
    }

    async fn available_storages(&self, node: &str) -> Result<Vec<StorageInfo>> {
        self.catalog.storages(node).await
    }

    async fn available_networks(&self, node: &str) -> Result<Vec<NetworkInfo>> {
        self.catalog.networks(node).await
    }

    async fn available_templates(&self, node: &str) -> Result<Vec<Template>> {
        self.catalog.templates(node).await
    }
}
