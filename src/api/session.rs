//! Ticket-based session state for password authentication.

use std::time::{Duration, Instant};

use serde::Deserialize;

/// Payload of a successful `POST /api2/json/access/ticket`.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketResponse {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_token: String,
    pub username: String,
}

/// A live session ticket plus its CSRF companion.
///
/// The generation counter identifies which login produced the ticket, so a
/// worker that got a 401 can tell whether another worker already refreshed
/// the session while it was waiting.
#[derive(Debug, Clone)]
pub struct Session {
    pub ticket: String,
    pub csrf_token: String,
    pub acquired_at: Instant,
    pub generation: u64,
}

impl Session {
    pub fn cookie_header(&self) -> String {
        format!("PVEAuthCookie={}", self.ticket)
    }

    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.acquired_at.elapsed() >= lifetime
    }
}
