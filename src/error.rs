use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy surfaced to the host application.
///
/// Every variant reaches the caller unmodified; the only place failures are
/// downgraded is catalog aggregation, where an unreachable node is skipped
/// with a warning instead of failing the whole query.
#[derive(Debug, Error)]
pub enum Error {
    /// TLS or transport failure. Fatal to the current call once the
    /// transport-level retry budget is exhausted.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Credentials rejected even after one re-authentication attempt.
    #[error("authentication rejected by the cluster")]
    Authentication,

    /// Proxmox rejected the request. Carries the HTTP status and the error
    /// body verbatim; never retried.
    #[error("API returned error (HTTP {status}): {message}")]
    Request { status: u16, message: String },

    /// A local pre-flight check failed; Proxmox was never contacted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A task resolved with a non-OK exit status. The message is Proxmox's
    /// exit status string, verbatim.
    #[error("task {upid} failed: {message}")]
    TaskFailure { upid: String, message: String },

    /// A task did not resolve within the wait bound. The outcome is unknown;
    /// the underlying task keeps running and callers must re-query state.
    #[error("task {upid} did not finish within {waited_secs}s (last status: {last_status})")]
    Timeout {
        upid: String,
        waited_secs: u64,
        last_status: String,
    },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl Error {
    /// True when Proxmox reported the addressed entity as absent, which
    /// idempotent operations treat as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Request { status, message } => {
                *status == 404
                    || message.contains("does not exist")
                    || message.contains("no such")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Connection(err.to_string())
    }
}
