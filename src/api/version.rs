use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub release: String,
    pub repoid: String,
}

impl super::Client {
    /// GET /api2/json/version — the cheapest authenticated round trip,
    /// used for connection tests.
    pub async fn version(&self) -> Result<VersionInfo> {
        self.get("/api2/json/version").await
    }
}
