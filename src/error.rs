//! Gateway error taxonomy.
//!
//! Every failure that can reach the HTTP boundary is one of these variants.
//! The mapping to HTTP status codes lives in `http::response`.

use thiserror::Error;

/// Reason reported by a well-formed error reply from the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    NotFound,
    Forbidden,
    Conflict,
    Other,
}

impl RejectionKind {
    /// Classify an RFC 6120 stanza error condition.
    pub fn from_condition(condition: &str) -> Self {
        match condition {
            "item-not-found" | "remote-server-not-found" => RejectionKind::NotFound,
            "forbidden" | "not-authorized" | "registration-required" | "not-allowed" => {
                RejectionKind::Forbidden
            }
            "conflict" => RejectionKind::Conflict,
            _ => RejectionKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::NotFound => "not-found",
            RejectionKind::Forbidden => "forbidden",
            RejectionKind::Conflict => "conflict",
            RejectionKind::Other => "other",
        }
    }
}

/// Errors produced while serving a subscription request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Credentials were missing or refused by the messaging server.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No matching reply arrived before the deadline.
    #[error("No reply to request {id} within {timeout_ms} ms")]
    Timeout { id: String, timeout_ms: u64 },

    /// Reply was malformed or did not have the expected structure.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote peer answered with a stanza error.
    #[error("Request rejected by remote peer: {condition}")]
    Rejected {
        kind: RejectionKind,
        condition: String,
        /// Application-specific condition, e.g. `not-subscribed`.
        detail: Option<String>,
    },

    /// The connection carrying the request went away.
    #[error("Connection to messaging server lost")]
    ConnectionLost,

    /// The HTTP request itself was invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Socket-level failure while talking to the messaging server.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl GatewayError {
    pub fn rejected(condition: impl Into<String>, detail: Option<String>) -> Self {
        let condition = condition.into();
        GatewayError::Rejected {
            kind: RejectionKind::from_condition(&condition),
            condition,
            detail,
        }
    }

    /// Short machine-readable label, used in error bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Authentication(_) => "unauthorized",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Protocol(_) => "protocol",
            GatewayError::Rejected { kind, .. } => kind.as_str(),
            GatewayError::ConnectionLost => "connection_lost",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Transport(_) => "transport",
        }
    }
}

/// `io::Error` is not `Clone`; a cloned transport error keeps its kind and message.
impl Clone for GatewayError {
    fn clone(&self) -> Self {
        match self {
            GatewayError::Authentication(reason) => GatewayError::Authentication(reason.clone()),
            GatewayError::Timeout { id, timeout_ms } => GatewayError::Timeout {
                id: id.clone(),
                timeout_ms: *timeout_ms,
            },
            GatewayError::Protocol(reason) => GatewayError::Protocol(reason.clone()),
            GatewayError::Rejected {
                kind,
                condition,
                detail,
            } => GatewayError::Rejected {
                kind: *kind,
                condition: condition.clone(),
                detail: detail.clone(),
            },
            GatewayError::ConnectionLost => GatewayError::ConnectionLost,
            GatewayError::BadRequest(reason) => GatewayError::BadRequest(reason.clone()),
            GatewayError::Transport(e) => {
                GatewayError::Transport(std::io::Error::new(e.kind(), e.to_string()))
            }
        }
    }
}

impl From<quick_xml::Error> for GatewayError {
    fn from(e: quick_xml::Error) -> Self {
        GatewayError::Protocol(format!("malformed XML: {}", e))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;
