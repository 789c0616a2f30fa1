//! XMPP client plumbing.
//!
//! # Data Flow
//! ```text
//! TCP socket
//!     → framing.rs (split byte stream into stanzas)
//!     → element.rs (parse stanza into an element tree)
//!     → transport.rs Link.inbound (one String per stanza)
//!
//! Link.outbound (one String per stanza)
//!     → transport.rs writer task
//!     → TCP socket
//! ```
//!
//! Everything above the [`transport::Connector`] seam deals in whole stanzas
//! and never sees the socket.

pub mod element;
pub mod framing;
pub mod jid;
pub mod transport;

use crate::error::GatewayError;

pub use element::Element;
pub use jid::Jid;
pub use transport::{Connector, Link, TcpConnector};

pub const NS_CLIENT: &str = "jabber:client";
pub const NS_STREAMS: &str = "http://etherx.jabber.org/streams";
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const NS_PING: &str = "urn:xmpp:ping";

/// Build the error carried by an `<iq type='error'/>` (or other error) stanza.
///
/// The defined condition comes from the `xmpp-stanzas` namespace; a child in
/// any other namespace is kept as the application-specific detail.
pub fn stanza_error(stanza: &Element) -> GatewayError {
    let Some(error) = stanza.children().find(|c| c.name() == "error") else {
        return GatewayError::Protocol("error reply without <error/> element".into());
    };

    let condition = error
        .children()
        .find(|c| c.ns() == Some(NS_STANZAS) && c.name() != "text")
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string());
    let detail = error
        .children()
        .find(|c| c.ns() != Some(NS_STANZAS))
        .map(|c| c.name().to_string());

    GatewayError::rejected(condition, detail)
}
