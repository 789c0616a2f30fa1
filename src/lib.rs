//! HTTP gateway for XMPP publish/subscribe subscription management.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pubsub;
pub mod session;
pub mod xmpp;

pub use config::schema::GatewayConfig;
pub use error::{GatewayError, Result};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
