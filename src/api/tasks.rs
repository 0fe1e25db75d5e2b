//! Task identifiers and the node-scoped task status endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::client::Client;
use crate::error::{Error, Result};

/// Proxmox task identifier, e.g.
/// `UPID:pve1:0000C3F2:0012AB34:663B9A21:qmcreate:100:root@pam:`.
///
/// Treated as an opaque correlation token; only the node field is ever
/// interpreted, because task status queries are node-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Upid(pub String);

impl Upid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The originating node, the second colon-separated field.
    pub fn node(&self) -> Option<&str> {
        self.0.split(':').nth(1).filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Upid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Stopped,
}

/// Status of a task as reported by `/nodes/{node}/tasks/{upid}/status`.
///
/// Proxmox encodes both success and failure as `stopped`; the exit status
/// string distinguishes them.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(rename = "exitstatus")]
    pub exit_status: Option<String>,
    pub node: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub user: Option<String>,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        self.status == TaskState::Stopped
    }

    pub fn is_success(&self) -> bool {
        self.is_finished() && self.exit_status.as_deref().map_or(true, |s| s == "OK")
    }
}

pub struct TasksApi<'a> {
    client: &'a Client,
}

impl<'a> TasksApi<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// GET /api2/json/nodes/{node}/tasks/{upid}/status
    pub async fn status(&self, upid: &Upid) -> Result<TaskStatus> {
        let node = upid
            .node()
            .ok_or_else(|| Error::Parse(format!("UPID missing node field: {upid}")))?;
        let path = format!(
            "/api2/json/nodes/{}/tasks/{}/status",
            node,
            urlencoding::encode(upid.as_str())
        );
        self.client.get(&path).await
    }
}
