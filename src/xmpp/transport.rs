//! Connections to the messaging server.
//!
//! # Responsibilities
//! - Define the [`Connector`] seam: credentials in, authenticated [`Link`] out
//! - Plaintext client-to-server connector: stream negotiation, SASL PLAIN,
//!   resource binding, legacy session establishment
//! - Pump stanzas between the socket and the link channels
//!
//! # Design Decisions
//! - A link is a pair of channels carrying whole stanzas as strings
//! - Dropping every outbound sender closes the stream (`</stream:stream>`)
//! - The inbound channel closing means the connection is gone
//! - No TLS on this side; the gateway is deployed next to the server

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::escape::escape;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::XmppConfig;
use crate::error::{GatewayError, Result};
use crate::xmpp::framing::{Frame, FrameBuffer};
use crate::xmpp::{
    stanza_error, Element, Jid, NS_BIND, NS_CLIENT, NS_SASL, NS_SESSION, NS_STREAMS,
};

/// Stanzas buffered per direction before senders wait.
const LINK_BUFFER: usize = 64;
const READ_CHUNK: usize = 8192;

/// An authenticated stanza pipe to the messaging server.
#[derive(Debug)]
pub struct Link {
    /// Full JID the server bound for this connection.
    pub jid: Jid,
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Server-side end of an in-memory link.
#[derive(Debug)]
pub struct PeerEnd {
    /// Stanzas written by the client.
    pub from_client: mpsc::Receiver<String>,
    /// Stanzas delivered to the client. Dropping it closes the link.
    pub to_client: mpsc::Sender<String>,
}

impl Link {
    /// In-memory link, for connectors that are not socket based.
    pub fn pair(jid: Jid) -> (Link, PeerEnd) {
        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
        (
            Link {
                jid,
                outbound: out_tx,
                inbound: in_rx,
            },
            PeerEnd {
                from_client: out_rx,
                to_client: in_tx,
            },
        )
    }
}

/// Establishes authenticated links for a given identity.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Authenticate as `jid` (full JID; its resource is requested at bind
    /// time) and return the live link.
    async fn connect(&self, jid: &Jid, password: &str) -> Result<Link>;
}

/// Plaintext TCP client-to-server connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    server_address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(server_address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            server_address: server_address.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &XmppConfig) -> Self {
        Self::new(
            config.server_address.clone(),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    async fn negotiate(&self, jid: &Jid, password: &str) -> Result<Link> {
        let stream = TcpStream::connect(&self.server_address).await?;
        stream.set_nodelay(true)?;

        let mut negotiation = Negotiation {
            stream,
            frames: FrameBuffer::new(),
            domain: jid.domain().to_string(),
        };

        let features = negotiation.open_stream().await?;
        negotiation.authenticate(jid, password, &features).await?;

        let features = negotiation.open_stream().await?;
        let bound = negotiation.bind(jid, &features).await?;
        negotiation.establish_session(&features).await?;

        tracing::debug!(
            jid = %bound,
            server = %self.server_address,
            "XMPP stream negotiated"
        );
        Ok(negotiation.into_link(bound))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, jid: &Jid, password: &str) -> Result<Link> {
        match tokio::time::timeout(self.connect_timeout, self.negotiate(jid, password)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                id: "stream-negotiation".to_string(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            }),
        }
    }
}

/// Stream state while negotiating, before the socket is split.
struct Negotiation {
    stream: TcpStream,
    frames: FrameBuffer,
    domain: String,
}

impl Negotiation {
    async fn send(&mut self, data: &str) -> Result<()> {
        tracing::trace!(data = %data, "client -> server (negotiation)");
        self.stream.write_all(data.as_bytes()).await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.frames.next_frame()? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(GatewayError::ConnectionLost);
            }
            self.frames.extend(&chunk[..n]);
        }
    }

    async fn read_element(&mut self) -> Result<Element> {
        match self.read_frame().await? {
            Frame::Stanza(raw) => Element::parse(&raw),
            Frame::StreamOpen(_) => Err(GatewayError::Protocol("unexpected stream header".into())),
            Frame::StreamClose => Err(GatewayError::ConnectionLost),
        }
    }

    /// Send a stream header and return the advertised features.
    async fn open_stream(&mut self) -> Result<Element> {
        let header = format!(
            "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xmlns='{}' xmlns:stream='{}'>",
            escape(self.domain.as_str()),
            NS_CLIENT,
            NS_STREAMS
        );
        self.send(&header).await?;

        match self.read_frame().await? {
            Frame::StreamOpen(_) => {}
            _ => return Err(GatewayError::Protocol("expected stream header".into())),
        }

        let features = self.read_element().await?;
        if features.name() != "features" {
            return Err(GatewayError::Protocol(format!(
                "expected stream features, got <{}>",
                features.name()
            )));
        }
        Ok(features)
    }

    async fn authenticate(&mut self, jid: &Jid, password: &str, features: &Element) -> Result<()> {
        let offers_plain = features
            .get_child("mechanisms", NS_SASL)
            .map(|m| m.children().any(|c| c.name() == "mechanism" && c.text_content() == "PLAIN"))
            .unwrap_or(false);
        if !offers_plain {
            return Err(GatewayError::Authentication(
                "server does not offer SASL PLAIN".into(),
            ));
        }

        let authcid = jid
            .node()
            .ok_or_else(|| GatewayError::Authentication("identity has no local part".into()))?;
        let payload = STANDARD.encode(format!("\0{}\0{}", authcid, password));
        let auth = Element::with_ns("auth", NS_SASL)
            .attr("mechanism", "PLAIN")
            .text(payload);
        self.send(&auth.to_string()).await?;

        let reply = self.read_element().await?;
        match reply.name() {
            "success" => Ok(()),
            "failure" => {
                let condition = reply
                    .children()
                    .find(|c| c.name() != "text")
                    .map(|c| c.name().to_string())
                    .unwrap_or_else(|| "not-authorized".to_string());
                Err(GatewayError::Authentication(condition))
            }
            other => Err(GatewayError::Protocol(format!("unexpected SASL reply <{}>", other))),
        }
    }

    async fn bind(&mut self, jid: &Jid, features: &Element) -> Result<Jid> {
        if features.get_child("bind", NS_BIND).is_none() {
            return Err(GatewayError::Protocol(
                "server does not offer resource binding".into(),
            ));
        }

        let mut bind = Element::with_ns("bind", NS_BIND);
        if let Some(resource) = jid.resource() {
            bind = bind.child(Element::with_ns("resource", NS_BIND).text(resource));
        }
        let iq = Element::new("iq")
            .attr("type", "set")
            .attr("id", "bind-1")
            .child(bind);
        self.send(&iq.to_string()).await?;

        let reply = self.read_iq_reply("bind-1").await?;
        reply
            .get_child("bind", NS_BIND)
            .and_then(|b| b.get_child("jid", NS_BIND))
            .ok_or_else(|| GatewayError::Protocol("bind result without JID".into()))?
            .text_content()
            .parse()
            .map_err(|_| GatewayError::Protocol("server bound an invalid JID".into()))
    }

    async fn establish_session(&mut self, features: &Element) -> Result<()> {
        let Some(session) = features.get_child("session", NS_SESSION) else {
            return Ok(());
        };
        if session.get_child("optional", NS_SESSION).is_some() {
            return Ok(());
        }

        let iq = Element::new("iq")
            .attr("type", "set")
            .attr("id", "session-1")
            .child(Element::with_ns("session", NS_SESSION));
        self.send(&iq.to_string()).await?;
        self.read_iq_reply("session-1").await.map(|_| ())
    }

    async fn read_iq_reply(&mut self, id: &str) -> Result<Element> {
        loop {
            let stanza = self.read_element().await?;
            if stanza.name() != "iq" || stanza.get_attr("id") != Some(id) {
                tracing::trace!(name = %stanza.name(), "Skipping stanza during negotiation");
                continue;
            }
            return match stanza.get_attr("type") {
                Some("result") => Ok(stanza),
                Some("error") => Err(stanza_error(&stanza)),
                _ => Err(GatewayError::Protocol(format!("unexpected reply to {}", id))),
            };
        }
    }

    fn into_link(self, jid: Jid) -> Link {
        let (read, write) = self.stream.into_split();
        let (link, peer) = Link::pair(jid);
        tokio::spawn(read_loop(read, self.frames, peer.to_client));
        tokio::spawn(write_loop(write, peer.from_client));
        link
    }
}

async fn read_loop(mut read: OwnedReadHalf, mut frames: FrameBuffer, inbound: mpsc::Sender<String>) {
    let mut chunk = vec![0u8; READ_CHUNK];
    'conn: loop {
        loop {
            match frames.next_frame() {
                Ok(Some(Frame::Stanza(stanza))) => {
                    tracing::trace!(stanza = %stanza, "server -> client");
                    if inbound.send(stanza).await.is_err() {
                        break 'conn;
                    }
                }
                Ok(Some(Frame::StreamClose)) => {
                    tracing::debug!("Server closed the XMPP stream");
                    break 'conn;
                }
                Ok(Some(Frame::StreamOpen(_))) => {
                    tracing::warn!("Unexpected stream restart from server");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping XMPP connection on framing error");
                    break 'conn;
                }
            }
        }

        match read.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!("XMPP socket closed by server");
                break;
            }
            Ok(n) => frames.extend(&chunk[..n]),
            Err(e) => {
                tracing::warn!(error = %e, "XMPP socket read failed");
                break;
            }
        }
    }
}

async fn write_loop(mut write: OwnedWriteHalf, mut outbound: mpsc::Receiver<String>) {
    while let Some(stanza) = outbound.recv().await {
        tracing::trace!(stanza = %stanza, "client -> server");
        if let Err(e) = write.write_all(stanza.as_bytes()).await {
            tracing::warn!(error = %e, "XMPP socket write failed");
            return;
        }
    }
    let _ = write.write_all(b"</stream:stream>").await;
    let _ = write.shutdown().await;
}
