//! Shared utilities for integration testing.
//!
//! [`MockPubsub`] is an in-memory messaging server: it implements
//! [`Connector`], authenticates users by password and answers pub/sub
//! owner queries and subscription changes from a node table.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use pubsub_gateway::config::GatewayConfig;
use pubsub_gateway::error::{GatewayError, Result};
use pubsub_gateway::http::HttpServer;
use pubsub_gateway::pubsub::stanza::{NS_PUBSUB, NS_PUBSUB_ERRORS, NS_PUBSUB_OWNER};
use pubsub_gateway::xmpp::{Connector, Element, Jid, Link, NS_STANZAS};

pub const POSTS: &str = "/user/alice@localhost/posts";

/// How a node reacts to requests.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Behavior {
    #[default]
    Normal,
    /// Every request is refused with `forbidden`.
    Forbidden,
    /// Requests are never answered.
    Silent,
    /// The connection is dropped on the first request.
    Crash,
    /// Replies are sent after a delay.
    Delay(Duration),
    /// Subscribe requests are refused with `not-allowed`.
    ClosedNode,
}

#[derive(Default)]
struct Node {
    affiliations: Vec<(String, String)>,
    behavior: Behavior,
}

type ClientSender = Arc<Mutex<Option<mpsc::Sender<String>>>>;

#[derive(Default)]
struct Inner {
    users: Mutex<HashMap<String, String>>,
    nodes: Mutex<HashMap<String, Node>>,
    requests: Mutex<Vec<String>>,
    links: Mutex<Vec<ClientSender>>,
    handshake_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
}

/// In-memory pub/sub server.
#[derive(Clone, Default)]
pub struct MockPubsub {
    inner: Arc<Inner>,
}

impl MockPubsub {
    /// Users alice, bob and eve (password = name) and alice's `posts` node
    /// with `{alice: owner, bob: subscriber}`.
    pub fn new() -> Self {
        let mock = Self::default();
        for user in ["alice", "bob", "eve"] {
            mock.add_user(user, user);
        }
        mock.add_node(
            POSTS,
            &[("alice@localhost", "owner"), ("bob@localhost", "subscriber")],
        );
        mock
    }

    pub fn add_user(&self, name: &str, password: &str) {
        self.inner
            .users
            .lock()
            .unwrap()
            .insert(name.to_string(), password.to_string());
    }

    pub fn add_node(&self, path: &str, affiliations: &[(&str, &str)]) {
        let node = Node {
            affiliations: affiliations
                .iter()
                .map(|(jid, role)| (jid.to_string(), role.to_string()))
                .collect(),
            behavior: Behavior::Normal,
        };
        self.inner.nodes.lock().unwrap().insert(path.to_string(), node);
    }

    pub fn set_behavior(&self, path: &str, behavior: Behavior) {
        if let Some(node) = self.inner.nodes.lock().unwrap().get_mut(path) {
            node.behavior = behavior;
        }
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        *self.inner.handshake_delay.lock().unwrap() = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of requests seen for an operation (`affiliations`, `subscribe`, ...).
    pub fn requests(&self, operation: &str) -> usize {
        self.inner
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.as_str() == operation)
            .count()
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        for link in self.inner.links.lock().unwrap().iter() {
            link.lock().unwrap().take();
        }
    }
}

#[async_trait]
impl Connector for MockPubsub {
    async fn connect(&self, jid: &Jid, password: &str) -> Result<Link> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.handshake_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let known = jid
            .node()
            .and_then(|user| self.inner.users.lock().unwrap().get(user).cloned());
        if known.as_deref() != Some(password) || jid.domain() != "localhost" {
            return Err(GatewayError::Authentication("not-authorized".into()));
        }

        let (link, peer) = Link::pair(jid.clone());
        let to_client: ClientSender = Arc::new(Mutex::new(Some(peer.to_client)));
        self.inner.links.lock().unwrap().push(to_client.clone());
        tokio::spawn(serve(
            self.inner.clone(),
            jid.clone(),
            peer.from_client,
            to_client,
        ));
        Ok(link)
    }
}

enum Action {
    Reply(Element),
    Delayed(Duration, Element),
    Silent,
    Crash,
}

async fn send(to_client: &ClientSender, stanza: Element) {
    let tx = to_client.lock().unwrap().clone();
    if let Some(tx) = tx {
        let _ = tx.send(stanza.to_string()).await;
    }
}

async fn serve(
    inner: Arc<Inner>,
    jid: Jid,
    mut from_client: mpsc::Receiver<String>,
    to_client: ClientSender,
) {
    while let Some(raw) = from_client.recv().await {
        let Ok(iq) = Element::parse(&raw) else {
            continue;
        };
        match inner.handle(&iq, &jid) {
            Action::Reply(reply) => send(&to_client, reply).await,
            Action::Delayed(delay, reply) => {
                let to_client = to_client.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    send(&to_client, reply).await;
                });
            }
            Action::Silent => {}
            Action::Crash => {
                to_client.lock().unwrap().take();
                return;
            }
        }
    }
}

fn result(request: &Element, jid: &Jid) -> Element {
    Element::new("iq")
        .attr("type", "result")
        .attr("id", request.get_attr("id").unwrap_or_default())
        .attr("to", jid.to_string())
}

fn error(request: &Element, jid: &Jid, condition: &str, application: Option<&str>) -> Element {
    let mut error = Element::new("error")
        .attr("type", "cancel")
        .child(Element::with_ns(condition, NS_STANZAS));
    if let Some(application) = application {
        error = error.child(Element::with_ns(application, NS_PUBSUB_ERRORS));
    }
    Element::new("iq")
        .attr("type", "error")
        .attr("id", request.get_attr("id").unwrap_or_default())
        .attr("to", jid.to_string())
        .child(error)
}

impl Inner {
    fn handle(&self, iq: &Element, jid: &Jid) -> Action {
        if iq.get_attr("from") != Some(jid.to_string().as_str()) {
            return Action::Reply(error(iq, jid, "bad-request", None));
        }
        let Some(op) = iq
            .children()
            .find(|c| c.name() == "pubsub")
            .and_then(|p| p.children().next())
        else {
            return Action::Reply(error(iq, jid, "bad-request", None));
        };
        self.requests.lock().unwrap().push(op.name().to_string());

        let path = op.get_attr("node").unwrap_or_default();
        let mut nodes = self.nodes.lock().unwrap();
        let Some(node) = nodes.get_mut(path) else {
            return Action::Reply(error(iq, jid, "item-not-found", None));
        };

        match node.behavior {
            Behavior::Silent => return Action::Silent,
            Behavior::Crash => return Action::Crash,
            Behavior::Forbidden => return Action::Reply(error(iq, jid, "forbidden", None)),
            _ => {}
        }

        let subject = op.get_attr("jid").unwrap_or_default().to_string();
        let reply = match (op.name(), op.ns()) {
            ("affiliations", Some(NS_PUBSUB_OWNER)) => {
                let list = node.affiliations.iter().fold(
                    Element::with_ns("affiliations", NS_PUBSUB_OWNER).attr("node", path),
                    |list, (jid, role)| {
                        list.child(
                            Element::with_ns("affiliation", NS_PUBSUB_OWNER)
                                .attr("jid", jid.as_str())
                                .attr("affiliation", role.as_str()),
                        )
                    },
                );
                result(iq, jid).child(Element::with_ns("pubsub", NS_PUBSUB_OWNER).child(list))
            }
            ("subscriptions", Some(NS_PUBSUB_OWNER)) => {
                let list = node
                    .affiliations
                    .iter()
                    .filter(|(_, role)| role == "subscriber")
                    .fold(
                        Element::with_ns("subscriptions", NS_PUBSUB_OWNER).attr("node", path),
                        |list, (jid, _)| {
                            list.child(
                                Element::with_ns("subscription", NS_PUBSUB_OWNER)
                                    .attr("jid", jid.as_str())
                                    .attr("subscription", "subscribed"),
                            )
                        },
                    );
                result(iq, jid).child(Element::with_ns("pubsub", NS_PUBSUB_OWNER).child(list))
            }
            ("subscribe", Some(NS_PUBSUB)) if node.behavior == Behavior::ClosedNode => {
                error(iq, jid, "not-allowed", Some("closed-node"))
            }
            ("subscribe", Some(NS_PUBSUB)) => {
                if !node.affiliations.iter().any(|(j, _)| *j == subject) {
                    node.affiliations.push((subject.clone(), "subscriber".to_string()));
                }
                result(iq, jid).child(
                    Element::with_ns("pubsub", NS_PUBSUB).child(
                        Element::with_ns("subscription", NS_PUBSUB)
                            .attr("node", path)
                            .attr("jid", subject.as_str())
                            .attr("subid", "sub-1")
                            .attr("subscription", "subscribed"),
                    ),
                )
            }
            ("unsubscribe", Some(NS_PUBSUB)) => {
                let before = node.affiliations.len();
                node.affiliations
                    .retain(|(j, role)| !(*j == subject && role == "subscriber"));
                if node.affiliations.len() == before {
                    error(iq, jid, "unexpected-request", Some("not-subscribed"))
                } else {
                    result(iq, jid)
                }
            }
            _ => error(iq, jid, "feature-not-implemented", None),
        };

        match node.behavior {
            Behavior::Delay(delay) => Action::Delayed(delay, reply),
            _ => Action::Reply(reply),
        }
    }
}

/// Gateway wired to `mock` with a short reply timeout.
pub fn gateway(mock: &MockPubsub) -> (Router, HttpServer) {
    let mut config = GatewayConfig::default();
    config.xmpp.request_timeout_secs = 1;
    gateway_with(mock, config)
}

pub fn gateway_with(mock: &MockPubsub, config: GatewayConfig) -> (Router, HttpServer) {
    let server = HttpServer::new(config, Arc::new(mock.clone()));
    (server.router(), server)
}

pub fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

pub fn subscriptions_uri(owner: &str, node: &str) -> String {
    format!("/channels/{}/{}/subscriptions", owner, node)
}

/// Send a request through the router and return status and JSON body (Null when empty).
pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    auth: Option<String>,
    body: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        request = request.header(header::AUTHORIZATION, auth);
    }
    let request = request
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub async fn get_roles(app: &Router, user: &str, owner: &str, node: &str) -> (StatusCode, Value) {
    let password = user.split('@').next().unwrap_or_default();
    call(
        app,
        Method::GET,
        &subscriptions_uri(owner, node),
        Some(basic(user, password)),
        None,
    )
    .await
}

pub async fn post_actions(
    app: &Router,
    user: &str,
    owner: &str,
    node: &str,
    body: &str,
) -> (StatusCode, Value) {
    let password = user.split('@').next().unwrap_or_default();
    call(
        app,
        Method::POST,
        &subscriptions_uri(owner, node),
        Some(basic(user, password)),
        Some(body),
    )
    .await
}
