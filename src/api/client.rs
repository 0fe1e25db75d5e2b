//! Authenticated HTTP(S) transport to one Proxmox VE cluster endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::common::ApiResponse;
use super::session::{Session, TicketResponse};
use crate::config::{ClusterConfig, Credentials, RetryConfig};
use crate::error::{Error, Result};

/// Proxmox API client. Cheap to clone; all state lives behind an `Arc`.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    auth: AuthMode,
    retry: RetryConfig,
    ticket_lifetime: Duration,
}

enum AuthMode {
    /// Pre-built `PVEAPIToken=...` header value.
    Token(String),
    Ticket(TicketAuth),
}

struct TicketAuth {
    username: String,
    password: String,
    session: RwLock<Option<Session>>,
    /// Serializes logins so a burst of 401s triggers exactly one
    /// re-authentication; everyone else waits and reuses its result.
    refresh: Mutex<()>,
}

struct AuthHeaders {
    headers: Vec<(&'static str, String)>,
    /// Generation of the session these headers came from, if any.
    generation: Option<u64>,
}

impl Client {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(Duration::from_secs(config.retry.timeout_seconds))
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        let auth = match &config.credentials {
            Credentials::Token(token) => AuthMode::Token(format!("PVEAPIToken={token}")),
            Credentials::Password {
                user,
                realm,
                password,
            } => AuthMode::Ticket(TicketAuth {
                username: format!("{user}@{realm}"),
                password: password.clone(),
                session: RwLock::new(None),
                refresh: Mutex::new(()),
            }),
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: config.base_url(),
                auth,
                retry: config.retry.clone(),
                ticket_lifetime: config.ticket_lifetime,
            }),
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::DELETE, path, None::<&()>).await
    }

    /// Nodes API operations
    pub fn nodes(&self) -> super::nodes::NodesApi<'_> {
        super::nodes::NodesApi::new(self)
    }

    /// Cluster-wide API operations
    pub fn cluster(&self) -> super::cluster::ClusterApi<'_> {
        super::cluster::ClusterApi::new(self)
    }

    /// Task status API operations
    pub fn tasks(&self) -> super::tasks::TasksApi<'_> {
        super::tasks::TasksApi::new(self)
    }

    async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let mutating = method != Method::GET;
        let mut transport_attempt: u32 = 0;
        let mut server_retried = false;
        let mut reauthenticated = false;

        loop {
            let auth = self.auth_headers(mutating).await?;
            let url = format!("{}{}", self.inner.base_url, path);
            tracing::debug!(method = %method, url = %url, "proxmox api request");

            let mut builder = self.inner.http.request(method.clone(), &url);
            for (name, value) in &auth.headers {
                builder = builder.header(*name, value);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return self.parse_response(response).await;
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        let ticket = match &self.inner.auth {
                            AuthMode::Ticket(t) if !reauthenticated => t,
                            _ => return Err(Error::Authentication),
                        };
                        self.refresh_session(ticket, auth.generation).await?;
                        reauthenticated = true;
                        continue;
                    }

                    // One retry on 5xx; everything else 4xx surfaces as-is.
                    if status.is_server_error() && !server_retried {
                        server_retried = true;
                        tracing::debug!(
                            status = status.as_u16(),
                            path,
                            "retrying after server error"
                        );
                        tokio::time::sleep(Duration::from_millis(
                            self.inner.retry.initial_backoff_ms,
                        ))
                        .await;
                        continue;
                    }

                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "unknown error".to_string());
                    return Err(Error::Request {
                        status: status.as_u16(),
                        message: text,
                    });
                }
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect() || e.is_request()) {
                        return Err(Error::Connection(e.to_string()));
                    }
                    transport_attempt += 1;
                    if transport_attempt > self.inner.retry.max_retries {
                        return Err(Error::Connection(e.to_string()));
                    }
                    let backoff = self.inner.retry.backoff_delay(transport_attempt);
                    tracing::debug!(
                        path,
                        backoff_ms = backoff.as_millis() as u64,
                        attempt = transport_attempt,
                        "retrying after transport error"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn auth_headers(&self, mutating: bool) -> Result<AuthHeaders> {
        match &self.inner.auth {
            AuthMode::Token(header) => Ok(AuthHeaders {
                headers: vec![("Authorization", header.clone())],
                generation: None,
            }),
            AuthMode::Ticket(ticket) => {
                let session = self.ensure_session(ticket).await?;
                let mut headers = vec![("Cookie", session.cookie_header())];
                // GET requests do not carry the CSRF token.
                if mutating {
                    headers.push(("CSRFPreventionToken", session.csrf_token.clone()));
                }
                Ok(AuthHeaders {
                    headers,
                    generation: Some(session.generation),
                })
            }
        }
    }

    async fn ensure_session(&self, auth: &TicketAuth) -> Result<Session> {
        // Bind before branching so the read guard is released; refreshing
        // while it is held would deadlock against the write below.
        let current = auth.session.read().await.clone();
        match current {
            Some(session) if !session.is_expired(self.inner.ticket_lifetime) => Ok(session),
            Some(session) => self.refresh_session(auth, Some(session.generation)).await,
            None => self.refresh_session(auth, None).await,
        }
    }

    /// Acquire a fresh ticket unless another worker already did so after the
    /// `observed` generation. Only one login runs at a time.
    async fn refresh_session(&self, auth: &TicketAuth, observed: Option<u64>) -> Result<Session> {
        let _guard = auth.refresh.lock().await;

        let cached = auth.session.read().await.clone();
        if let Some(session) = cached {
            if !session.is_expired(self.inner.ticket_lifetime)
                && observed != Some(session.generation)
            {
                return Ok(session);
            }
        }

        let response = self.login(auth).await?;
        let generation = auth
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.generation + 1)
            .unwrap_or(1);
        let session = Session {
            ticket: response.ticket,
            csrf_token: response.csrf_token,
            acquired_at: Instant::now(),
            generation,
        };
        *auth.session.write().await = Some(session.clone());
        tracing::debug!(username = %auth.username, generation, "acquired new API ticket");
        Ok(session)
    }

    /// Ticket logins get the same transport-level retry budget as regular
    /// requests; a network blip here must not fail the caller's request.
    async fn login(&self, auth: &TicketAuth) -> Result<TicketResponse> {
        let url = format!("{}/api2/json/access/ticket", self.inner.base_url);
        let mut transport_attempt: u32 = 0;

        let response = loop {
            let sent = self
                .inner
                .http
                .post(&url)
                .form(&[
                    ("username", auth.username.as_str()),
                    ("password", auth.password.as_str()),
                ])
                .send()
                .await;
            match sent {
                Ok(response) => break response,
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect() || e.is_request()) {
                        return Err(Error::Connection(e.to_string()));
                    }
                    transport_attempt += 1;
                    if transport_attempt > self.inner.retry.max_retries {
                        return Err(Error::Connection(e.to_string()));
                    }
                    let backoff = self.inner.retry.backoff_delay(transport_attempt);
                    tracing::debug!(
                        backoff_ms = backoff.as_millis() as u64,
                        attempt = transport_attempt,
                        "retrying ticket login after transport error"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication);
        }
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::Request {
                status: status.as_u16(),
                message: text,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        serde_json::from_str::<ApiResponse<TicketResponse>>(&text)
            .map(|wrapper| wrapper.data)
            .map_err(|e| Error::Parse(format!("ticket response: {e}")))
    }

    /// Unwrap the `{"data": ...}` envelope, falling back to the bare payload
    /// for the few endpoints that return one.
    async fn parse_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let text = response
            .text()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        match serde_json::from_str::<ApiResponse<T>>(&text) {
            Ok(wrapper) => Ok(wrapper.data),
            Err(_) => match serde_json::from_str::<T>(&text) {
                Ok(data) => Ok(data),
                Err(e) => {
                    tracing::error!(error = %e, body = %text, "failed to deserialize response");
                    Err(Error::Parse(e.to_string()))
                }
            },
        }
    }
}
