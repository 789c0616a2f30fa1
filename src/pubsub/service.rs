//! Subscription operations exposed over HTTP.
//!
//! # Data Flow
//! ```text
//! list:   acquire session → affiliations query [→ subscriptions query] → merge
//! apply:  acquire session → for each action:
//!             subscribe/unsubscribe → re-query roles
//!         (first failure stops the sequence)
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::pubsub::node::NodeAddress;
use crate::pubsub::roles::{merge_roles, RoleMap};
use crate::pubsub::stanza::{
    parse_affiliations, parse_subscriptions, Operation, StanzaBuilder, NOT_SUBSCRIBED,
};
use crate::session::{SessionManager, XmppSession};
use crate::xmpp::Jid;

/// Per-call view of the reloadable settings.
struct Settings {
    builder: StanzaBuilder,
    timeout: Duration,
    include_subscriptions: bool,
}

/// Subscription management on behalf of authenticated callers.
#[derive(Debug, Clone)]
pub struct SubscriptionService {
    sessions: Arc<SessionManager>,
    config: Arc<ArcSwap<GatewayConfig>>,
}

impl SubscriptionService {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<ArcSwap<GatewayConfig>>) -> Self {
        Self { sessions, config }
    }

    fn settings(&self) -> Result<Settings> {
        let config = self.config.load();
        let service = config
            .xmpp
            .pubsub_service
            .as_deref()
            .map(str::parse::<Jid>)
            .transpose()
            .map_err(|e| GatewayError::Protocol(format!("invalid pub/sub service: {}", e)))?;
        Ok(Settings {
            builder: StanzaBuilder::new(service),
            timeout: Duration::from_secs(config.xmpp.request_timeout_secs),
            include_subscriptions: config.xmpp.include_subscriptions,
        })
    }

    /// Current role map of `node`, as seen by `caller`.
    pub async fn role_map(&self, caller: &Jid, password: &str, node: &NodeAddress) -> Result<RoleMap> {
        let settings = self.settings()?;
        let session = self.sessions.acquire(caller, password).await?;
        query_roles(&session, &settings, node).await
    }

    /// Subscribe (`true`) or unsubscribe (`false`) the caller, in order.
    pub async fn apply(
        &self,
        caller: &Jid,
        password: &str,
        node: &NodeAddress,
        actions: &[bool],
    ) -> Result<()> {
        let settings = self.settings()?;
        let session = self.sessions.acquire(caller, password).await?;
        let subject = session.jid().bare().to_string();

        for (step, &subscribe) in actions.iter().enumerate() {
            let operation = if subscribe {
                Operation::Subscribe
            } else {
                Operation::Unsubscribe
            };
            let request = settings.builder.build(operation, node, session.jid());

            match session.request(request, settings.timeout).await {
                Ok(_) => {}
                Err(GatewayError::Rejected { detail: Some(detail), .. })
                    if !subscribe && detail == NOT_SUBSCRIBED =>
                {
                    tracing::debug!(node = %node, subject = %subject, "Unsubscribe of non-subscriber ignored");
                }
                Err(e) => {
                    tracing::warn!(
                        node = %node,
                        subject = %subject,
                        step = step,
                        error = %e,
                        "Subscription change failed"
                    );
                    return Err(e);
                }
            }

            let roles = query_roles(&session, &settings, node).await?;
            let listed = roles.contains_key(&subject);
            if listed != subscribe {
                tracing::debug!(
                    node = %node,
                    subject = %subject,
                    subscribed = subscribe,
                    listed = listed,
                    "Role map does not reflect subscription change"
                );
            }
        }

        tracing::info!(node = %node, subject = %subject, actions = actions.len(), "Subscriptions updated");
        Ok(())
    }
}

async fn query_roles(session: &XmppSession, settings: &Settings, node: &NodeAddress) -> Result<RoleMap> {
    let request = settings.builder.affiliations(node, session.jid());
    let reply = session.request(request, settings.timeout).await?;
    let affiliations = parse_affiliations(&reply, node)?;

    let subscriptions = if settings.include_subscriptions {
        let request = settings.builder.subscriptions(node, session.jid());
        let reply = session.request(request, settings.timeout).await?;
        parse_subscriptions(&reply, node)?
    } else {
        Vec::new()
    };

    merge_roles(&affiliations, &subscriptions)
}
