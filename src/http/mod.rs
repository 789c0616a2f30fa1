//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID)
//!     → auth.rs (Basic credentials → caller JID + password)
//!     → handlers.rs (GET/POST subscriptions, health)
//!     → pubsub::SubscriptionService
//!     → response.rs (errors → status + JSON body)
//! ```

pub mod auth;
pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use auth::BasicCredentials;
pub use request::{MakeRequestUuid, RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
