//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Messaging server connection settings.
    pub xmpp: XmppConfig,

    /// HTTP-side timeouts.
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Messaging server settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct XmppConfig {
    /// Domain served by the messaging server.
    pub domain: String,

    /// Client-to-server address (e.g., "127.0.0.1:5222").
    pub server_address: String,

    /// Resource bound for callers that authenticate with a bare JID.
    pub resource: String,

    /// Dedicated pub/sub service JID. Requests go to the user's server when unset.
    pub pubsub_service: Option<String>,

    /// Stream negotiation and authentication timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Time to wait for each reply in seconds.
    pub request_timeout_secs: u64,

    /// Also query the subscription list and fold subscribers into role maps.
    pub include_subscriptions: bool,
}

impl Default for XmppConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            server_address: "127.0.0.1:5222".to_string(),
            resource: "http".to_string(),
            pubsub_service: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 10,
            include_subscriptions: false,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on a whole HTTP request in seconds.
    pub http_request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_request_secs: 30,
        }
    }
}

/// Request hardening.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 64 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
