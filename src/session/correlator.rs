//! Request/reply correlation for one connection.
//!
//! # Responsibilities
//! - Stamp every outbound request with an id unique on this connection
//! - Keep the table of pending requests and their deadlines
//! - Hand each reply to the caller waiting on its id
//!
//! # Design Decisions
//! - Removal from the pending table is the single terminal transition:
//!   whoever removes an entry (reply dispatch, deadline, connection loss,
//!   abandoned caller) decides the outcome, so it is delivered exactly once
//! - Replies for ids no longer pending are dropped silently; they are late
//!   answers to requests that already timed out or were abandoned

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::error::{GatewayError, Result};
use crate::observability::metrics;
use crate::xmpp::{Element, Jid};

const ID_PREFIX_LEN: usize = 8;

#[derive(Debug)]
struct PendingRequest {
    issuer: String,
    sent_at: Instant,
    /// None when the timeout is too large to represent.
    deadline: Option<Instant>,
    tx: oneshot::Sender<Result<Element>>,
}

/// Pending-request table of a single connection.
#[derive(Debug)]
pub struct Correlator {
    prefix: String,
    next_id: AtomicU64,
    pending: DashMap<String, PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        let prefix: String = std::iter::repeat_with(fastrand::alphanumeric)
            .take(ID_PREFIX_LEN)
            .collect();
        Self {
            prefix,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    fn next_id(&self) -> String {
        format!("{}-{}", self.prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of requests still waiting for an outcome.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn take(&self, id: &str) -> Option<PendingRequest> {
        let (_, entry) = self.pending.remove(id)?;
        metrics::pending_removed();
        Some(entry)
    }

    /// Send `request` on `outbound` and wait for its reply.
    ///
    /// Resolves with the raw reply document, a timeout, or `ConnectionLost`.
    pub async fn send(
        &self,
        outbound: &mpsc::Sender<String>,
        mut request: Element,
        issuer: &Jid,
        timeout: Duration,
    ) -> Result<Element> {
        let id = self.next_id();
        request.set_attr("id", id.as_str());

        let (tx, mut rx) = oneshot::channel();
        let now = Instant::now();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                issuer: issuer.to_string(),
                sent_at: now,
                deadline: now.checked_add(timeout),
                tx,
            },
        );
        metrics::pending_added();
        let _abandon = AbandonGuard {
            correlator: self,
            id: &id,
        };

        if outbound.send(request.to_string()).await.is_err() {
            return match self.take(&id) {
                Some(_) => Err(GatewayError::ConnectionLost),
                None => rx.try_recv().unwrap_or(Err(GatewayError::ConnectionLost)),
            };
        }
        tracing::trace!(id = %id, issuer = %issuer, "Request sent");

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(GatewayError::ConnectionLost),
            Err(_) => match self.take(&id) {
                Some(_) => {
                    tracing::warn!(id = %id, issuer = %issuer, timeout = ?timeout, "Request timed out");
                    Err(GatewayError::Timeout {
                        id: id.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
                // Resolved between the deadline firing and our removal.
                None => rx.try_recv().unwrap_or(Err(GatewayError::ConnectionLost)),
            },
        }
    }

    /// Deliver a reply. Returns false when `id` is not pending.
    pub fn resolve(&self, id: &str, reply: Element) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };
        let now = Instant::now();
        metrics::record_roundtrip(now.duration_since(entry.sent_at));
        if entry.deadline.is_some_and(|deadline| now > deadline) {
            tracing::debug!(id = %id, issuer = %entry.issuer, "Reply raced the deadline");
        }
        // The waiter may have gone away; the entry is consumed either way.
        let _ = entry.tx.send(Ok(reply));
        true
    }

    /// Reject every pending request with `ConnectionLost`.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some(entry) = self.take(&id) {
                tracing::debug!(id = %id, issuer = %entry.issuer, "Rejecting pending request");
                let _ = entry.tx.send(Err(GatewayError::ConnectionLost));
                failed += 1;
            }
        }
        failed
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops the pending entry if the waiting caller goes away.
struct AbandonGuard<'a> {
    correlator: &'a Correlator,
    id: &'a str,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.correlator.take(self.id).is_some() {
            tracing::debug!(id = %self.id, "Caller abandoned pending request");
        }
    }
}
