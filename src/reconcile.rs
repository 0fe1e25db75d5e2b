//! Projection of Proxmox VM state into the host's generic attribute model.
//!
//! Proxmox is the single source of truth; everything here is a transient
//! view built for one host request. Fields the adapter does not interpret
//! are carried through verbatim so read-modify-write cycles never lose
//! configuration the operator set elsewhere.

use std::collections::BTreeMap;
use std::fmt;

use crate::api::qemu::{VmConfig, VmRuntimeStatus};

/// Lifecycle status as observed, not owned. Transitions happen inside
/// Proxmox; the adapter only requests them and polls for their effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Unknown,
    Stopped,
    Running,
    Suspended,
    Deleting,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerState::Unknown => "unknown",
            PowerState::Stopped => "stopped",
            PowerState::Running => "running",
            PowerState::Suspended => "suspended",
            PowerState::Deleting => "deleting",
        };
        f.write_str(name)
    }
}

/// A suspended VM reports `status: running` with `qmpstatus: paused`.
pub fn power_state(status: &VmRuntimeStatus) -> PowerState {
    match status.status.as_str() {
        "running" => {
            if status.qmpstatus.as_deref() == Some("paused") {
                PowerState::Suspended
            } else {
                PowerState::Running
            }
        }
        "stopped" => PowerState::Stopped,
        "suspended" | "paused" => PowerState::Suspended,
        _ => PowerState::Unknown,
    }
}

pub(crate) fn power_from_name(status: &str) -> PowerState {
    match status {
        "running" => PowerState::Running,
        "stopped" => PowerState::Stopped,
        "suspended" | "paused" => PowerState::Suspended,
        _ => PowerState::Unknown,
    }
}

/// Minimal identity of a VM, enough for the host to list and re-find it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub vmid: u32,
    pub node: String,
    pub name: Option<String>,
    pub power: PowerState,
}

/// A disk device string (`storage:volume,size=20G,...`), parsed but with
/// every option preserved in its original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskAttachment {
    pub slot: String,
    pub storage: String,
    pub volume: String,
    options: Vec<(String, Option<String>)>,
}

impl DiskAttachment {
    pub fn parse(slot: &str, value: &str) -> Option<Self> {
        let (head, rest) = match value.split_once(',') {
            Some((head, rest)) => (head, Some(rest)),
            None => (value, None),
        };
        let (storage, volume) = head.split_once(':')?;
        if storage.is_empty() {
            return None;
        }
        let options = rest
            .map(parse_options)
            .unwrap_or_default();
        Some(Self {
            slot: slot.to_string(),
            storage: storage.to_string(),
            volume: volume.to_string(),
            options,
        })
    }

    /// Size option verbatim, e.g. `20G`.
    pub fn size(&self) -> Option<&str> {
        option_value(&self.options, "size")
    }

    pub fn render(&self) -> String {
        render_parts(format!("{}:{}", self.storage, self.volume), &self.options)
    }
}

/// A network device string (`virtio=MAC,bridge=vmbr0,tag=30,...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicAttachment {
    pub slot: String,
    pub model: String,
    pub mac: Option<String>,
    options: Vec<(String, Option<String>)>,
}

impl NicAttachment {
    pub fn parse(slot: &str, value: &str) -> Option<Self> {
        let mut parts = value.split(',');
        let head = parts.next()?;
        if head.is_empty() {
            return None;
        }
        let (model, mac) = match head.split_once('=') {
            Some((model, mac)) => (model.to_string(), Some(mac.to_string())),
            None => (head.to_string(), None),
        };
        let options = parse_options(&parts.collect::<Vec<_>>().join(","));
        Some(Self {
            slot: slot.to_string(),
            model,
            mac,
            options,
        })
    }

    pub fn bridge(&self) -> Option<&str> {
        option_value(&self.options, "bridge")
    }

    pub fn vlan_tag(&self) -> Option<u16> {
        option_value(&self.options, "tag").and_then(|t| t.parse().ok())
    }

    pub fn render(&self) -> String {
        let head = match &self.mac {
            Some(mac) => format!("{}={}", self.model, mac),
            None => self.model.clone(),
        };
        render_parts(head, &self.options)
    }
}

fn parse_options(rest: &str) -> Vec<(String, Option<String>)> {
    if rest.is_empty() {
        return Vec::new();
    }
    rest.split(',')
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (k.to_string(), Some(v.to_string())),
            None => (part.to_string(), None),
        })
        .collect()
}

fn option_value<'a>(options: &'a [(String, Option<String>)], key: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.as_deref())
}

fn render_parts(head: String, options: &[(String, Option<String>)]) -> String {
    let mut out = head;
    for (key, value) in options {
        out.push(',');
        out.push_str(key);
        if let Some(value) = value {
            out.push('=');
            out.push_str(value);
        }
    }
    out
}

/// The host-facing projection of one VM.
#[derive(Debug, Clone, PartialEq)]
pub struct VmRecord {
    pub vmid: u32,
    pub node: String,
    pub name: Option<String>,
    pub power: PowerState,
    pub cores: Option<u32>,
    pub sockets: Option<u32>,
    pub memory_mb: Option<u64>,
    pub ostype: Option<String>,
    /// Config digest, usable for optimistic concurrency on updates.
    pub digest: Option<String>,
    pub disks: Vec<DiskAttachment>,
    pub nics: Vec<NicAttachment>,
    /// Every config field the adapter does not interpret, verbatim.
    pub extra: BTreeMap<String, serde_json::Value>,
}

const DISK_PREFIXES: [&str; 4] = ["scsi", "virtio", "sata", "ide"];

fn slot_index(key: &str, prefix: &str) -> Option<u32> {
    key.strip_prefix(prefix)?.parse().ok()
}

fn is_disk_slot(key: &str) -> bool {
    DISK_PREFIXES
        .iter()
        .any(|prefix| slot_index(key, prefix).is_some())
}

fn is_nic_slot(key: &str) -> bool {
    slot_index(key, "net").is_some()
}

/// Build the host-facing record from a config plus current status.
///
/// Device strings that fail to parse stay in `extra` untouched rather than
/// failing the projection.
pub fn project(vmid: u32, node: &str, config: VmConfig, status: &VmRuntimeStatus) -> VmRecord {
    let mut disks = Vec::new();
    let mut nics = Vec::new();
    let mut extra = BTreeMap::new();

    for (key, value) in config.extra {
        let text = value.as_str();
        if let Some(text) = text {
            if is_disk_slot(&key) {
                if let Some(disk) = DiskAttachment::parse(&key, text) {
                    disks.push(disk);
                    continue;
                }
                tracing::warn!(slot = %key, "unparseable disk device string, kept opaque");
            } else if is_nic_slot(&key) {
                if let Some(nic) = NicAttachment::parse(&key, text) {
                    nics.push(nic);
                    continue;
                }
                tracing::warn!(slot = %key, "unparseable network device string, kept opaque");
            }
        }
        extra.insert(key, value);
    }

    disks.sort_by(|a, b| a.slot.cmp(&b.slot));
    nics.sort_by(|a, b| a.slot.cmp(&b.slot));

    VmRecord {
        vmid,
        node: node.to_string(),
        name: config.name,
        power: power_state(status),
        cores: config.cores,
        sockets: config.sockets,
        memory_mb: config.memory,
        ostype: config.ostype,
        digest: config.digest,
        disks,
        nics,
        extra,
    }
}
