//! Proxmox VE REST API surface under `/api2/json`.

pub mod client;
pub mod cluster;
pub mod common;
pub mod nodes;
pub mod qemu;
pub mod session;
pub mod tasks;
#[cfg(test)]
pub mod test_helpers;
pub mod version;

pub use client::Client;
pub use qemu::PowerAction;
pub use tasks::{TaskState, TaskStatus, Upid};
pub use version::VersionInfo;
