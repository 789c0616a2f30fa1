//! Per-identity session registry.
//!
//! # Responsibilities
//! - Hand out the live session for an identity, creating it on demand
//! - Run at most one handshake per identity at a time
//! - Evict sessions whose connection went away
//!
//! # Design Decisions
//! - Each identity gets a slot: a handshake mutex plus an atomically
//!   swappable current session, so the fast path is a lock-free load
//! - A failed handshake never replaces or caches a session. Callers that
//!   queued behind it with the same credential get its error instead of
//!   starting handshakes of their own
//! - Eviction compares session ids, so a stale close notification cannot
//!   remove a newer session

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::{GatewayError, Result};
use crate::observability::metrics;
use crate::session::connection::{SessionId, XmppSession};
use crate::xmpp::{Connector, Jid};

#[derive(Default)]
struct Slot {
    handshake: Mutex<()>,
    current: ArcSwapOption<XmppSession>,
    /// Handshakes completed on this slot, successful or not.
    finished: AtomicU64,
    failure: StdMutex<Option<Failure>>,
}

struct Failure {
    attempt: u64,
    credential: String,
    error: GatewayError,
}

impl Slot {
    fn reusable(&self, credential: &str) -> Option<Arc<XmppSession>> {
        self.current
            .load_full()
            .filter(|s| s.is_alive() && s.accepts(credential))
    }

    /// Error of a handshake with `credential` that completed after `seen`.
    fn failed_since(&self, seen: u64, credential: &str) -> Option<GatewayError> {
        let failure = self.failure.lock().ok()?;
        failure
            .as_ref()
            .filter(|f| f.attempt > seen && f.credential == credential)
            .map(|f| f.error.clone())
    }

    fn finish(&self, credential: &str, outcome: Option<&GatewayError>) {
        let attempt = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut failure) = self.failure.lock() {
            *failure = outcome.map(|error| Failure {
                attempt,
                credential: credential.to_string(),
                error: error.clone(),
            });
        }
    }
}

type Slots = DashMap<String, Arc<Slot>>;

/// Registry of authenticated sessions, keyed by full JID.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    default_resource: String,
    slots: Arc<Slots>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, default_resource: impl Into<String>) -> Self {
        Self {
            connector,
            default_resource: default_resource.into(),
            slots: Arc::new(DashMap::new()),
        }
    }

    /// The identity a session is opened for: bare JIDs get the default resource.
    pub fn full_identity(&self, jid: &Jid) -> Result<Jid> {
        if jid.is_bare() {
            jid.with_resource(&self.default_resource)
        } else {
            Ok(jid.clone())
        }
    }

    /// Return the live session for `jid`, authenticating with `credential`
    /// if there is none or if the credential differs from the cached one.
    pub async fn acquire(&self, jid: &Jid, credential: &str) -> Result<Arc<XmppSession>> {
        let identity = self.full_identity(jid)?;
        let key = identity.to_string();

        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        if let Some(session) = slot.reusable(credential) {
            return Ok(session);
        }

        let seen = slot.finished.load(Ordering::SeqCst);
        let guard = slot.handshake.lock().await;
        // Someone else may have finished a handshake while we waited.
        if let Some(session) = slot.reusable(credential) {
            return Ok(session);
        }
        if let Some(error) = slot.failed_since(seen, credential) {
            drop(guard);
            drop(slot);
            prune(&self.slots, &key);
            return Err(error);
        }

        tracing::debug!(jid = %identity, "Opening XMPP session");
        let link = match self.connector.connect(&identity, credential).await {
            Ok(link) => {
                metrics::record_handshake("success");
                slot.finish(credential, None);
                link
            }
            Err(e) => {
                metrics::record_handshake("failure");
                tracing::warn!(jid = %identity, error = %e, "XMPP handshake failed");
                slot.finish(credential, Some(&e));
                drop(guard);
                drop(slot);
                prune(&self.slots, &key);
                return Err(e);
            }
        };

        let slots = Arc::downgrade(&self.slots);
        let evict_key = key.clone();
        let session = XmppSession::start(link, credential, move |id| {
            evict(&slots, &evict_key, id);
        });

        if let Some(previous) = slot.current.swap(Some(session.clone())) {
            tracing::info!(jid = %identity, session = %previous.id(), "Replacing XMPP session");
            previous.close();
        }
        metrics::record_active_sessions(self.active_sessions());
        Ok(session)
    }

    /// Sessions currently cached and alive.
    pub fn active_sessions(&self) -> usize {
        count_active(&self.slots)
    }

    /// Close every cached session. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for slot in self.slots.iter() {
            if let Some(session) = slot.current.swap(None) {
                session.close();
                closed += 1;
            }
        }
        self.slots.clear();
        metrics::record_active_sessions(0);
        closed
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("default_resource", &self.default_resource)
            .field("identities", &self.slots.len())
            .finish()
    }
}

fn count_active(slots: &Slots) -> usize {
    slots
        .iter()
        .filter(|slot| {
            slot.current
                .load()
                .as_ref()
                .map(|s| s.is_alive())
                .unwrap_or(false)
        })
        .count()
}

/// Drop the session `id` from the slot for `key`, if it is still current.
fn evict(slots: &Weak<Slots>, key: &str, id: SessionId) {
    let Some(slots) = slots.upgrade() else {
        return;
    };
    let Some(slot) = slots.get(key).map(|s| Arc::clone(s.value())) else {
        return;
    };

    let mut evicted = false;
    slot.current.rcu(|current| {
        evicted = matches!(current, Some(session) if session.id() == id);
        if evicted {
            None
        } else {
            current.clone()
        }
    });
    drop(slot);

    if evicted {
        tracing::info!(jid = %key, session = %id, "Evicted XMPP session");
        prune(&slots, key);
        metrics::record_active_sessions(count_active(&slots));
    }
}

/// Remove an empty slot nobody else is holding.
fn prune(slots: &Slots, key: &str) {
    slots.remove_if(key, |_, slot| {
        Arc::strong_count(slot) == 1 && slot.current.load().is_none()
    });
}
