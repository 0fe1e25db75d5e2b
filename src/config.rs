//! Configuration surface supplied by the host's compute-resource storage.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// How the adapter authenticates against the cluster.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Full API token in `user@realm!tokenid=secret` form, sent as an
    /// `Authorization` header. No session state, no CSRF token.
    Token(String),
    /// Username/password login via `/access/ticket`. The resulting session
    /// ticket is shared across concurrent operations.
    Password {
        user: String,
        realm: String,
        password: String,
    },
}

impl Credentials {
    pub fn token(value: impl Into<String>) -> Self {
        Credentials::Token(value.into())
    }

    pub fn password(
        user: impl Into<String>,
        realm: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Credentials::Password {
            user: user.into(),
            realm: realm.into(),
            password: password.into(),
        }
    }
}

/// Transport-level retry tuning. Defaults are starting points, not contract.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_seconds: u64,
}

impl RetryConfig {
    /// Exponential backoff for the given 1-based attempt, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let ms = std::cmp::min(
            self.initial_backoff_ms
                .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1))),
            self.max_backoff_ms,
        );
        Duration::from_millis(ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
            timeout_seconds: 30,
        }
    }
}

/// Task polling tuning. The total timeout is caller-overridable per wait.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub total_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            total_timeout: Duration::from_secs(120),
        }
    }
}

/// One Proxmox VE cluster endpoint and everything needed to talk to it.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub endpoint: Url,
    pub credentials: Credentials,
    pub insecure: bool,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    /// Proxmox tickets live two hours; refresh proactively before that.
    pub ticket_lifetime: Duration,
}

impl ClusterConfig {
    pub fn new(endpoint: &str, credentials: Credentials) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Validation(format!("invalid endpoint URL: {e}")))?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(Error::Validation(format!(
                "endpoint must be http(s), got {}",
                endpoint.scheme()
            )));
        }
        Ok(Self {
            endpoint,
            credentials,
            insecure: false,
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            ticket_lifetime: Duration::from_secs(105 * 60),
        })
    }

    /// Build from environment, the same variables the provider config
    /// accepts: `PROXMOX_ENDPOINT`, then either `PROXMOX_API_TOKEN` or
    /// `PROXMOX_USER` (`user@realm`) + `PROXMOX_PASSWORD`, plus
    /// `PROXMOX_INSECURE`.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("PROXMOX_ENDPOINT").map_err(|_| {
            Error::Validation("PROXMOX_ENDPOINT is required".to_string())
        })?;

        let credentials = if let Ok(token) = std::env::var("PROXMOX_API_TOKEN") {
            Credentials::Token(token)
        } else {
            let user = std::env::var("PROXMOX_USER").map_err(|_| {
                Error::Validation(
                    "either PROXMOX_API_TOKEN or PROXMOX_USER/PROXMOX_PASSWORD is required"
                        .to_string(),
                )
            })?;
            let password = std::env::var("PROXMOX_PASSWORD").map_err(|_| {
                Error::Validation("PROXMOX_PASSWORD is required with PROXMOX_USER".to_string())
            })?;
            let (user, realm) = user
                .split_once('@')
                .ok_or_else(|| {
                    Error::Validation("PROXMOX_USER must be in user@realm form".to_string())
                })?;
            Credentials::password(user, realm, password)
        };

        let insecure = std::env::var("PROXMOX_INSECURE")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        let mut config = Self::new(&endpoint, credentials)?;
        config.insecure = insecure;
        Ok(config)
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub(crate) fn base_url(&self) -> String {
        self.endpoint.as_str().trim_end_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn rejects_non_http_endpoint() {
        let result = ClusterConfig::new("ftp://pve.example.com", Credentials::token("t"));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            timeout_seconds: 30,
        };
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(retry.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(retry.backoff_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn strips_trailing_slash() {
        let config =
            ClusterConfig::new("https://pve.example.com:8006/", Credentials::token("t")).unwrap();
        assert_eq!(config.base_url(), "https://pve.example.com:8006");
    }

    #[test]
    #[serial]
    fn from_env_prefers_api_token() {
        std::env::set_var("PROXMOX_ENDPOINT", "https://localhost:8006");
        std::env::set_var("PROXMOX_API_TOKEN", "test@pve!token=secret");
        std::env::set_var("PROXMOX_USER", "root@pam");
        std::env::set_var("PROXMOX_PASSWORD", "hunter2");

        let config = ClusterConfig::from_env().unwrap();
        assert!(matches!(config.credentials, Credentials::Token(ref t) if t.contains("token")));

        std::env::remove_var("PROXMOX_ENDPOINT");
        std::env::remove_var("PROXMOX_API_TOKEN");
        std::env::remove_var("PROXMOX_USER");
        std::env::remove_var("PROXMOX_PASSWORD");
    }

    #[test]
    #[serial]
    fn from_env_falls_back_to_password() {
        std::env::set_var("PROXMOX_ENDPOINT", "https://localhost:8006");
        std::env::remove_var("PROXMOX_API_TOKEN");
        std::env::set_var("PROXMOX_USER", "root@pam");
        std::env::set_var("PROXMOX_PASSWORD", "hunter2");
        std::env::set_var("PROXMOX_INSECURE", "true");

        let config = ClusterConfig::from_env().unwrap();
        match config.credentials {
            Credentials::Password {
                ref user,
                ref realm,
                ..
            } => {
                assert_eq!(user, "root");
                assert_eq!(realm, "pam");
            }
            _ => panic!("expected password credentials"),
        }
        assert!(config.insecure);

        std::env::remove_var("PROXMOX_ENDPOINT");
        std::env::remove_var("PROXMOX_USER");
        std::env::remove_var("PROXMOX_PASSWORD");
        std::env::remove_var("PROXMOX_INSECURE");
    }

    #[test]
    #[serial]
    fn from_env_requires_endpoint() {
        std::env::remove_var("PROXMOX_ENDPOINT");
        std::env::remove_var("PROXMOX_API_TOKEN");
        let result = ClusterConfig::from_env();
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
