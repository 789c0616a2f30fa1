//! Outbound pub/sub requests and parsing of their replies.
//!
//! # Request shapes
//! ```text
//! <iq type='get' from='{actor}' [to='{service}']>
//!   <pubsub xmlns='http://jabber.org/protocol/pubsub#owner'>
//!     <affiliations node='/user/{owner}/{name}'/>      (or <subscriptions/>)
//!   </pubsub>
//! </iq>
//!
//! <iq type='set' from='{actor}' [to='{service}']>
//!   <pubsub xmlns='http://jabber.org/protocol/pubsub'>
//!     <subscribe node='/user/{owner}/{name}' jid='{actor, bare}'/>
//!   </pubsub>
//! </iq>
//! ```
//!
//! The `id` attribute is left to the correlator.

use crate::error::{GatewayError, Result};
use crate::pubsub::node::NodeAddress;
use crate::pubsub::roles::{Affiliation, Subscription};
use crate::xmpp::{Element, Jid};

pub const NS_PUBSUB: &str = "http://jabber.org/protocol/pubsub";
pub const NS_PUBSUB_OWNER: &str = "http://jabber.org/protocol/pubsub#owner";
pub const NS_PUBSUB_ERRORS: &str = "http://jabber.org/protocol/pubsub#errors";

/// Application error sent back for an unsubscribe of a non-subscriber.
pub const NOT_SUBSCRIBED: &str = "not-subscribed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Owner query of the node's affiliation list.
    Affiliations,
    /// Owner query of the node's subscription list.
    Subscriptions,
    Subscribe,
    Unsubscribe,
}

impl Operation {
    fn element(&self) -> &'static str {
        match self {
            Operation::Affiliations => "affiliations",
            Operation::Subscriptions => "subscriptions",
            Operation::Subscribe => "subscribe",
            Operation::Unsubscribe => "unsubscribe",
        }
    }

    fn namespace(&self) -> &'static str {
        match self {
            Operation::Affiliations | Operation::Subscriptions => NS_PUBSUB_OWNER,
            Operation::Subscribe | Operation::Unsubscribe => NS_PUBSUB,
        }
    }

    fn iq_type(&self) -> &'static str {
        match self {
            Operation::Affiliations | Operation::Subscriptions => "get",
            Operation::Subscribe | Operation::Unsubscribe => "set",
        }
    }

    fn names_subject(&self) -> bool {
        matches!(self, Operation::Subscribe | Operation::Unsubscribe)
    }
}

/// Builds pub/sub requests, optionally addressed to a dedicated service.
#[derive(Debug, Clone, Default)]
pub struct StanzaBuilder {
    service: Option<Jid>,
}

impl StanzaBuilder {
    pub fn new(service: Option<Jid>) -> Self {
        Self { service }
    }

    pub fn build(&self, operation: Operation, node: &NodeAddress, actor: &Jid) -> Element {
        let mut request = Element::with_ns(operation.element(), operation.namespace())
            .attr("node", node.path());
        if operation.names_subject() {
            request.set_attr("jid", actor.bare().to_string());
        }

        let mut iq = Element::new("iq")
            .attr("type", operation.iq_type())
            .attr("from", actor.to_string());
        if let Some(service) = &self.service {
            iq.set_attr("to", service.to_string());
        }
        iq.child(Element::with_ns("pubsub", operation.namespace()).child(request))
    }

    pub fn affiliations(&self, node: &NodeAddress, actor: &Jid) -> Element {
        self.build(Operation::Affiliations, node, actor)
    }

    pub fn subscriptions(&self, node: &NodeAddress, actor: &Jid) -> Element {
        self.build(Operation::Subscriptions, node, actor)
    }

    pub fn subscribe(&self, node: &NodeAddress, actor: &Jid) -> Element {
        self.build(Operation::Subscribe, node, actor)
    }

    pub fn unsubscribe(&self, node: &NodeAddress, actor: &Jid) -> Element {
        self.build(Operation::Unsubscribe, node, actor)
    }
}

/// Find `<pubsub xmlns=owner><{list} node=...>` in a result reply.
fn owner_list<'a>(reply: &'a Element, list: &str, node: &NodeAddress) -> Result<&'a Element> {
    let element = reply
        .get_child("pubsub", NS_PUBSUB_OWNER)
        .and_then(|p| p.get_child(list, NS_PUBSUB_OWNER))
        .ok_or_else(|| GatewayError::Protocol(format!("reply has no <{}/> list", list)))?;

    let expected = node.path();
    match element.get_attr("node") {
        Some(reported) if reported != expected => Err(GatewayError::Protocol(format!(
            "reply is for node {}, expected {}",
            reported, expected
        ))),
        _ => Ok(element),
    }
}

fn required_attr<'a>(element: &'a Element, name: &str) -> Result<&'a str> {
    element.get_attr(name).ok_or_else(|| {
        GatewayError::Protocol(format!("<{}/> without {} attribute", element.name(), name))
    })
}

/// Parse the reply to an affiliations query.
pub fn parse_affiliations(reply: &Element, node: &NodeAddress) -> Result<Vec<Affiliation>> {
    owner_list(reply, "affiliations", node)?
        .children()
        .filter(|c| c.name() == "affiliation")
        .map(|entry| {
            Ok(Affiliation {
                jid: required_attr(entry, "jid")?.to_string(),
                role: required_attr(entry, "affiliation")?.parse()?,
            })
        })
        .collect()
}

/// Parse the reply to a subscriptions query.
pub fn parse_subscriptions(reply: &Element, node: &NodeAddress) -> Result<Vec<Subscription>> {
    owner_list(reply, "subscriptions", node)?
        .children()
        .filter(|c| c.name() == "subscription")
        .map(|entry| {
            Ok(Subscription {
                jid: required_attr(entry, "jid")?.to_string(),
                subid: entry.get_attr("subid").map(str::to_string),
                state: required_attr(entry, "subscription")?.parse()?,
            })
        })
        .collect()
}
