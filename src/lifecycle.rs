//! VM lifecycle orchestration: create, update, destroy, power.
//!
//! The controller requests transitions and polls for their effect; the state
//! machine itself lives inside Proxmox. Blocking on task completion here is
//! what gives the host its synchronous contract.

use std::collections::BTreeMap;

use crate::api::qemu::{CreateVmRequest, PowerAction, UpdateVmRequest};
use crate::api::Client;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::poller::TaskPoller;
use crate::reconcile::{self, PowerState, VmHandle, VmRecord};

/// Desired shape of a new VM.
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub node: String,
    /// Chosen id, or None to let the cluster suggest the next free one.
    pub vmid: Option<u32>,
    pub cores: u32,
    pub memory_mb: u64,
    pub ostype: Option<String>,
    pub disks: Vec<DiskSpec>,
    pub nics: Vec<NicSpec>,
}

#[derive(Debug, Clone)]
pub struct DiskSpec {
    pub storage: String,
    pub size_gb: u64,
    /// Device slot such as `scsi0`; defaults to `scsi{index}`.
    pub slot: Option<String>,
}

impl DiskSpec {
    pub fn size_bytes(&self) -> u64 {
        self.size_gb * 1024 * 1024 * 1024
    }
}

#[derive(Debug, Clone, Default)]
pub struct NicSpec {
    pub bridge: String,
    /// NIC model; defaults to `virtio`.
    pub model: Option<String>,
    pub mac: Option<String>,
    pub vlan: Option<u16>,
}

/// Attribute changes to apply to an existing VM. Unset fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct VmDelta {
    pub name: Option<String>,
    pub cores: Option<u32>,
    pub memory_mb: Option<u64>,
    pub ostype: Option<String>,
    /// Expected config digest, as read from [`VmRecord::digest`]. When set,
    /// Proxmox rejects the update if the config changed since that read.
    pub digest: Option<String>,
}

impl VmDelta {
    /// True when no attribute change is requested. A digest on its own does
    /// not count; it only guards other changes.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.cores.is_none()
            && self.memory_mb.is_none()
            && self.ostype.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub record: VmRecord,
    /// Attributes that were applied but take effect only on the next boot.
    /// The controller never forces a reboot for them.
    pub pending_restart: Vec<&'static str>,
}

pub struct LifecycleController {
    client: Client,
    catalog: Catalog,
    poller: TaskPoller,
}

impl LifecycleController {
    pub fn new(client: Client, poller: TaskPoller) -> Self {
        Self {
            catalog: Catalog::new(client.clone()),
            client,
            poller,
        }
    }

    /// Validate the spec against the catalog, create the VM, and block until
    /// the create task resolves. The nextid reservation is not atomic across
    /// concurrent callers; an "already exists" rejection is retried exactly
    /// once with a freshly requested id.
    pub async fn create(&self, spec: &VmSpec) -> Result<VmRecord> {
        self.validate(spec).await?;

        let qemu = self.client.nodes().node(&spec.node).qemu();
        let vmid = match spec.vmid {
            Some(vmid) => vmid,
            None => self.client.cluster().next_id().await?,
        };
        let mut request = build_create_request(vmid, spec);

        let upid = match qemu.create(&request).await {
            Ok(upid) => upid,
            Err(error) if is_vmid_conflict(&error) => {
                let fresh = self.client.cluster().next_id().await?;
                tracing::warn!(
                    vmid = request.vmid,
                    retry_vmid = fresh,
                    "vmid already taken, retrying create with a fresh id"
                );
                request.vmid = fresh;
                qemu.create(&request).await?
            }
            Err(error) => return Err(error),
        };
        let vmid = request.vmid;
        self.poller.wait(&self.client, &upid).await?;

        self.fetch_record(&spec.node, vmid)
            .await?
            .ok_or_else(|| Error::Request {
                status: 404,
                message: format!("VM {vmid} not found after create task completed"),
            })
    }

    /// Apply only the changed attributes. Memory and core changes on a
    /// running VM are accepted by Proxmox but become effective at next boot;
    /// they are reported back as pending instead of forcing a restart.
    pub async fn update(&self, vmid: u32, delta: &VmDelta) -> Result<UpdateOutcome> {
        let node = self.require_node(vmid).await?;
        let qemu = self.client.nodes().node(&node).qemu();

        if delta.is_empty() {
            let record = self.require_record(&node, vmid).await?;
            return Ok(UpdateOutcome {
                record,
                pending_restart: Vec::new(),
            });
        }

        let status = qemu.status(vmid).await?;
        let live = matches!(
            reconcile::power_state(&status),
            PowerState::Running | PowerState::Suspended
        );
        let mut pending_restart = Vec::new();
        if live {
            if delta.cores.is_some() {
                pending_restart.push("cores");
            }
            if delta.memory_mb.is_some() {
                pending_restart.push("memory");
            }
        }

        let request = UpdateVmRequest {
            name: delta.name.clone(),
            cores: delta.cores,
            memory: delta.memory_mb,
            ostype: delta.ostype.clone(),
            digest: delta.digest.clone(),
        };
        if let Some(upid) = qemu.update_config(vmid, &request).await? {
            self.poller.wait(&self.client, &upid).await?;
        }

        let record = self.require_record(&node, vmid).await?;
        Ok(UpdateOutcome {
            record,
            pending_restart,
        })
    }

    /// Stop (if needed) and delete. Destroying an absent vmid is success:
    /// the desired end state is already achieved.
    pub async fn destroy(&self, vmid: u32) -> Result<()> {
        let Some(node) = self.locate(vmid).await? else {
            tracing::debug!(vmid, "destroy of absent VM treated as success");
            return Ok(());
        };
        let qemu = self.client.nodes().node(&node).qemu();

        match qemu.status(vmid).await {
            Ok(status) => {
                if reconcile::power_state(&status) != PowerState::Stopped {
                    let upid = qemu.power(vmid, PowerAction::Stop).await?;
                    self.poller.wait(&self.client, &upid).await?;
                }
            }
            Err(error) if error.is_not_found() => return Ok(()),
            Err(error) => return Err(error),
        }

        match qemu.delete(vmid, true).await {
            Ok(upid) => {
                self.poller.wait(&self.client, &upid).await?;
                Ok(())
            }
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Request a power transition. Transitions that are invalid from the
    /// current state are no-ops answering with that state, not errors.
    pub async fn power(&self, vmid: u32, action: PowerAction) -> Result<PowerState> {
        let node = self.require_node(vmid).await?;
        let qemu = self.client.nodes().node(&node).qemu();

        let current = reconcile::power_state(&qemu.status(vmid).await?);
        if is_noop(action, current) {
            tracing::debug!(vmid, ?action, state = %current, "power action is a no-op");
            return Ok(current);
        }

        let upid = qemu.power(vmid, action).await?;
        self.poller.wait(&self.client, &upid).await?;
        Ok(reconcile::power_state(&qemu.status(vmid).await?))
    }

    /// Every QEMU guest in the cluster, as lightweight handles.
    pub async fn list(&self) -> Result<Vec<VmHandle>> {
        let resources = self.client.cluster().vm_resources().await?;
        Ok(resources
            .into_iter()
            .map(|r| VmHandle {
                vmid: r.vmid,
                node: r.node,
                name: r.name,
                power: r
                    .status
                    .as_deref()
                    .map(reconcile::power_from_name)
                    .unwrap_or(PowerState::Unknown),
            })
            .collect())
    }

    /// Full record for one VM, or None when it vanished externally. The host
    /// reconciles its own records from the absence.
    pub async fn find(&self, vmid: u32) -> Result<Option<VmRecord>> {
        match self.locate(vmid).await? {
            Some(node) => self.fetch_record(&node, vmid).await,
            None => Ok(None),
        }
    }

    /// Resolve a vmid to its current node via the cluster resource index.
    async fn locate(&self, vmid: u32) -> Result<Option<String>> {
        let resources = self.client.cluster().vm_resources().await?;
        Ok(resources
            .into_iter()
            .find(|r| r.vmid == vmid)
            .map(|r| r.node))
    }

    async fn require_node(&self, vmid: u32) -> Result<String> {
        self.locate(vmid).await?.ok_or_else(|| Error::Request {
            status: 404,
            message: format!("VM {vmid} does not exist in the cluster"),
        })
    }

    async fn fetch_record(&self, node: &str, vmid: u32) -> Result<Option<VmRecord>> {
        let qemu = self.client.nodes().node(node).qemu();
        let config = match qemu.config(vmid).await {
            Ok(config) => config,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error),
        };
        let status = match qemu.status(vmid).await {
            Ok(status) => status,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error),
        };
        Ok(Some(reconcile::project(vmid, node, config, &status)))
    }

    async fn require_record(&self, node: &str, vmid: u32) -> Result<VmRecord> {
        self.fetch_record(node, vmid)
            .await?
            .ok_or_else(|| Error::Request {
                status: 404,
                message: format!("VM {vmid} vanished during the operation"),
            })
    }

    /// Pre-flight checks against the catalog. Proxmox is not contacted for
    /// mutation until all of them pass.
    async fn validate(&self, spec: &VmSpec) -> Result<()> {
        if spec.name.is_empty() {
            return Err(Error::Validation("VM name must not be empty".to_string()));
        }
        if spec.cores == 0 {
            return Err(Error::Validation("cores must be at least 1".to_string()));
        }
        if spec.memory_mb == 0 {
            return Err(Error::Validation("memory must be at least 1 MiB".to_string()));
        }

        let nodes = self.catalog.nodes().await?;
        let node = nodes
            .iter()
            .find(|n| n.node == spec.node)
            .ok_or_else(|| Error::Validation(format!("unknown node {}", spec.node)))?;
        if !node.is_online() {
            return Err(Error::Validation(format!(
                "node {} is not online (status: {})",
                node.node, node.status
            )));
        }

        let storages = self.catalog.storages(&spec.node).await?;
        for disk in &spec.disks {
            let storage = storages
                .iter()
                .find(|s| s.storage == disk.storage)
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "storage {} does not exist on node {}",
                        disk.storage, spec.node
                    ))
                })?;
            if storage.active == Some(false) {
                return Err(Error::Validation(format!(
                    "storage {} is not active on node {}",
                    disk.storage, spec.node
                )));
            }
            if let Some(avail) = storage.avail {
                if avail < disk.size_bytes() {
                    return Err(Error::Validation(format!(
                        "storage {} has {avail} bytes free, need {}",
                        disk.storage,
                        disk.size_bytes()
                    )));
                }
            }
        }

        let networks = self.catalog.networks(&spec.node).await?;
        for nic in &spec.nics {
            if !networks.iter().any(|n| n.iface == nic.bridge) {
                return Err(Error::Validation(format!(
                    "bridge {} does not exist on node {}",
                    nic.bridge, spec.node
                )));
            }
        }

        Ok(())
    }
}

fn build_create_request(vmid: u32, spec: &VmSpec) -> CreateVmRequest {
    let mut devices = BTreeMap::new();
    for (index, disk) in spec.disks.iter().enumerate() {
        let slot = disk
            .slot
            .clone()
            .unwrap_or_else(|| format!("scsi{index}"));
        // "storage:N" asks Proxmox to allocate N GiB on that storage.
        devices.insert(slot, format!("{}:{}", disk.storage, disk.size_gb));
    }
    for (index, nic) in spec.nics.iter().enumerate() {
        let model = nic.model.as_deref().unwrap_or("virtio");
        let mut value = match &nic.mac {
            Some(mac) => format!("{model}={mac}"),
            None => model.to_string(),
        };
        value.push_str(&format!(",bridge={}", nic.bridge));
        if let Some(tag) = nic.vlan {
            value.push_str(&format!(",tag={tag}"));
        }
        devices.insert(format!("net{index}"), value);
    }

    CreateVmRequest {
        vmid,
        name: Some(spec.name.clone()),
        cores: Some(spec.cores),
        memory: Some(spec.memory_mb),
        ostype: spec.ostype.clone(),
        devices,
    }
}

fn is_vmid_conflict(error: &Error) -> bool {
    matches!(error, Error::Request { message, .. } if message.contains("already exists"))
}

fn is_noop(action: PowerAction, current: PowerState) -> bool {
    match action {
        PowerAction::Start => current == PowerState::Running,
        PowerAction::Stop | PowerAction::Shutdown => current == PowerState::Stopped,
        PowerAction::Reset => current != PowerState::Running,
        PowerAction::Suspend => current != PowerState::Running,
        PowerAction::Resume => current != PowerState::Suspended,
    }
}
