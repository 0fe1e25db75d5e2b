//! Static description of what this adapter can do, for hosts that probe
//! capabilities before offering operations to their users.

use std::collections::BTreeMap;

use crate::reconcile::VmRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Destroy,
    PowerControl,
    Suspend,
    Catalog,
}

#[derive(Debug, Clone, Copy)]
pub struct CapabilityDescriptor {
    pub provider: &'static str,
    pub guest_type: &'static str,
    pub operations: &'static [OperationKind],
    /// Console access is delegated to the Proxmox web UI, not proxied here.
    pub console: bool,
}

static DESCRIPTOR: CapabilityDescriptor = CapabilityDescriptor {
    provider: "proxmox",
    guest_type: "qemu",
    operations: &[
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Destroy,
        OperationKind::PowerControl,
        OperationKind::Suspend,
        OperationKind::Catalog,
    ],
    console: false,
};

pub fn descriptor() -> &'static CapabilityDescriptor {
    &DESCRIPTOR
}

/// Provider-specific facts a host can attach to its own inventory record.
pub fn vm_facts(record: &VmRecord) -> BTreeMap<String, String> {
    let mut facts = BTreeMap::new();
    facts.insert("proxmox_vmid".to_string(), record.vmid.to_string());
    facts.insert("proxmox_node".to_string(), record.node.clone());
    if let Some(ostype) = &record.ostype {
        facts.insert("proxmox_ostype".to_string(), ostype.clone());
    }
    facts
}
