//! Bounded polling that makes Proxmox's asynchronous tasks look synchronous.
//!
//! Every mutating Proxmox call answers with a UPID instead of a result; the
//! poller drives that task to a terminal state so callers keep a synchronous
//! contract. This is deliberately the only place that knows about waiting,
//! so a streaming host integration can replace it without touching the
//! lifecycle controller.

use std::time::{Duration, Instant};

use crate::api::{Client, Upid};
use crate::config::PollConfig;
use crate::error::{Error, Result};

/// Successful terminal state of a task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub upid: Upid,
    pub exit_status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskPoller {
    pub interval: Duration,
    pub timeout: Duration,
}

impl TaskPoller {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            interval: config.interval,
            timeout: config.total_timeout,
        }
    }

    /// Wait for a task with the default timeout.
    pub async fn wait(&self, client: &Client, upid: &Upid) -> Result<TaskOutcome> {
        self.wait_with(client, upid, self.timeout).await
    }

    /// Poll the task's originating node until it stops or the bound expires.
    ///
    /// A timeout does not cancel anything; the Proxmox task keeps running
    /// and the caller must treat the outcome as unknown.
    pub async fn wait_with(
        &self,
        client: &Client,
        upid: &Upid,
        timeout: Duration,
    ) -> Result<TaskOutcome> {
        let started = Instant::now();
        let tasks = client.tasks();
        let mut last_status = "unknown".to_string();

        loop {
            let status = tasks.status(upid).await?;
            if status.is_finished() {
                if status.is_success() {
                    tracing::debug!(upid = %upid, "task finished");
                    return Ok(TaskOutcome {
                        upid: upid.clone(),
                        exit_status: status.exit_status,
                    });
                }
                return Err(Error::TaskFailure {
                    upid: upid.to_string(),
                    message: status
                        .exit_status
                        .unwrap_or_else(|| "no exit status reported".to_string()),
                });
            }
            // A stopped task already returned above, so only running remains.
            last_status = "running".to_string();

            if started.elapsed() + self.interval > timeout {
                return Err(Error::Timeout {
                    upid: upid.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                    last_status,
                });
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_helpers::test_client;
    use mockito::Server;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn upid() -> Upid {
        Upid("UPID:pve1:0000C3F2:0012AB34:663B9A21:qmcreate:100:root@pam:".to_string())
    }

    fn status_path() -> String {
        format!(
            "/api2/json/nodes/pve1/tasks/{}/status",
            urlencoding::encode(upid().as_str())
        )
    }

    fn fast_poller() -> TaskPoller {
        TaskPoller {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn running_then_stopped_ok_succeeds() {
        let mut server = Server::new_async().await;
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let _mock = server
            .mock("GET", status_path().as_str())
            .with_body_from_request(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    br#"{"data":{"status":"running"}}"#.to_vec()
                } else {
                    br#"{"data":{"status":"stopped","exitstatus":"OK"}}"#.to_vec()
                }
            })
            .expect(3)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let outcome = fast_poller().wait(&client, &upid()).await.unwrap();
        assert_eq!(outcome.exit_status.as_deref(), Some("OK"));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_ok_exit_status_is_task_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", status_path().as_str())
            .with_body(
                r#"{"data":{"status":"stopped","exitstatus":"unable to create image: no space left"}}"#,
            )
            .create_async()
            .await;

        let client = test_client(&server.url());
        match fast_poller().wait(&client, &upid()).await {
            Err(Error::TaskFailure { message, .. }) => {
                assert_eq!(message, "unable to create image: no space left");
            }
            other => panic!("expected TaskFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn task_stuck_running_times_out() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", status_path().as_str())
            .with_body(r#"{"data":{"status":"running"}}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let poller = TaskPoller {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
        };
        match poller.wait(&client, &upid()).await {
            Err(Error::Timeout { last_status, .. }) => {
                assert_eq!(last_status, "running");
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn caller_override_shortens_the_bound() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", status_path().as_str())
            .with_body(r#"{"data":{"status":"running"}}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let poller = TaskPoller {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(120),
        };
        let started = Instant::now();
        let result = poller
            .wait_with(&client, &upid(), Duration::from_millis(40))
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
