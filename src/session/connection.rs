//! One authenticated connection and its lifecycle.
//!
//! # Responsibilities
//! - Generate unique session ids for tracing
//! - Run the reader task that feeds replies into the correlator
//! - Answer server-initiated pings so the server keeps the stream
//! - Detect connection loss and reject everything still pending

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, Result};
use crate::observability::metrics;
use crate::session::correlator::Correlator;
use crate::xmpp::{stanza_error, Element, Jid, Link, NS_PING, NS_STANZAS};

/// Global counter for session ids; only uniqueness matters.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an XMPP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xmpp-{}", self.0)
    }
}

/// A live, authenticated connection for one identity.
#[derive(Debug)]
pub struct XmppSession {
    id: SessionId,
    jid: Jid,
    credential: String,
    outbound: mpsc::Sender<String>,
    correlator: Arc<Correlator>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl XmppSession {
    /// Take over `link` and start dispatching its inbound stanzas.
    ///
    /// `on_close` runs once, from the reader task, when the link goes away
    /// on its own. It does not run after [`XmppSession::close`].
    pub fn start<F>(link: Link, credential: &str, on_close: F) -> Arc<Self>
    where
        F: FnOnce(SessionId) + Send + 'static,
    {
        let id = SessionId::new();
        let correlator = Arc::new(Correlator::new());
        let alive = Arc::new(AtomicBool::new(true));

        let reader = Reader {
            id,
            inbound: link.inbound,
            outbound: link.outbound.clone(),
            correlator: correlator.clone(),
            alive: alive.clone(),
        };
        let reader = tokio::spawn(reader.run(on_close));

        tracing::info!(session = %id, jid = %link.jid, "XMPP session established");

        Arc::new(Self {
            id,
            jid: link.jid,
            credential: credential.to_string(),
            outbound: link.outbound,
            correlator,
            alive,
            reader,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Full JID bound by the server.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Whether `credential` is the one this session authenticated with.
    pub fn accepts(&self, credential: &str) -> bool {
        constant_time_eq(self.credential.as_bytes(), credential.as_bytes())
    }

    /// Send an iq request and wait for a `result` reply.
    ///
    /// Error replies come back as [`GatewayError::Rejected`].
    pub async fn request(&self, stanza: Element, timeout: Duration) -> Result<Element> {
        if !self.is_alive() {
            return Err(GatewayError::ConnectionLost);
        }

        let kind = payload_name(&stanza);
        let outcome = self
            .correlator
            .send(&self.outbound, stanza, &self.jid, timeout)
            .await
            .and_then(classify_reply);

        let label = match &outcome {
            Ok(_) => "result",
            Err(GatewayError::Rejected { .. }) => "error",
            Err(GatewayError::Timeout { .. }) => "timeout",
            Err(GatewayError::ConnectionLost) => "connection_lost",
            Err(_) => "protocol",
        };
        metrics::record_stanza(kind, label);
        outcome
    }

    /// Shut the session down and reject its pending requests.
    pub fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.reader.abort();
            let failed = self.correlator.fail_all();
            tracing::info!(session = %self.id, jid = %self.jid, failed_requests = failed, "XMPP session closed");
        }
    }
}

impl Drop for XmppSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Name of the operation element inside an iq, for metrics.
fn payload_name(stanza: &Element) -> String {
    stanza
        .children()
        .next()
        .map(|payload| payload.children().next().unwrap_or(payload))
        .map(|op| op.name().to_string())
        .unwrap_or_else(|| stanza.name().to_string())
}

fn classify_reply(reply: Element) -> Result<Element> {
    match reply.get_attr("type") {
        Some("result") => Ok(reply),
        Some("error") => Err(stanza_error(&reply)),
        other => Err(GatewayError::Protocol(format!(
            "unexpected reply type {:?}",
            other
        ))),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

struct Reader {
    id: SessionId,
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
    correlator: Arc<Correlator>,
    alive: Arc<AtomicBool>,
}

impl Reader {
    async fn run<F: FnOnce(SessionId)>(mut self, on_close: F) {
        // Either half going away ends the session.
        loop {
            let raw = tokio::select! {
                raw = self.inbound.recv() => raw,
                _ = self.outbound.closed() => {
                    tracing::debug!(session = %self.id, "XMPP write side closed");
                    None
                }
            };
            let Some(raw) = raw else { break };
            match Element::parse(&raw) {
                Ok(stanza) => self.dispatch(stanza),
                Err(e) => {
                    tracing::warn!(session = %self.id, error = %e, "Discarding unparseable stanza");
                }
            }
        }

        self.alive.store(false, Ordering::SeqCst);
        let failed = self.correlator.fail_all();
        tracing::warn!(session = %self.id, failed_requests = failed, "XMPP connection lost");
        on_close(self.id);
    }

    fn dispatch(&self, stanza: Element) {
        if stanza.name() != "iq" {
            tracing::trace!(session = %self.id, name = %stanza.name(), "Ignoring unsolicited stanza");
            return;
        }
        let Some(id) = stanza.get_attr("id").map(str::to_string) else {
            tracing::debug!(session = %self.id, "Ignoring iq without id");
            return;
        };

        match stanza.get_attr("type") {
            Some("result") | Some("error") => {
                if !self.correlator.resolve(&id, stanza) {
                    tracing::debug!(session = %self.id, id = %id, "Discarding reply for unknown request");
                }
            }
            Some("get") | Some("set") => self.answer(&stanza, &id),
            other => {
                tracing::debug!(session = %self.id, id = %id, kind = ?other, "Ignoring iq of unknown type");
            }
        }
    }

    /// Reply to a server-initiated request: pong for pings, refusal otherwise.
    fn answer(&self, request: &Element, id: &str) {
        let mut reply = Element::new("iq").attr("id", id);
        if let Some(from) = request.get_attr("from") {
            reply.set_attr("to", from);
        }
        if request.get_child("ping", NS_PING).is_some() {
            reply.set_attr("type", "result");
        } else {
            reply.set_attr("type", "error");
            reply = reply.child(
                Element::new("error")
                    .attr("type", "cancel")
                    .child(Element::with_ns("service-unavailable", NS_STANZAS)),
            );
        }
        if self.outbound.try_send(reply.to_string()).is_err() {
            tracing::debug!(session = %self.id, id = %id, "Could not answer server request");
        }
    }
}
