//! XMPP sessions held on behalf of HTTP callers.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → manager.rs (acquire session for caller identity)
//!     → connection.rs (XmppSession::request)
//!     → correlator.rs (stamp id, register pending, send)
//!     ... reply arrives on the link ...
//!     → connection.rs reader task
//!     → correlator.rs (resolve by id)
//!     → HTTP handler
//! ```

pub mod connection;
pub mod correlator;
pub mod manager;

pub use connection::{SessionId, XmppSession};
pub use correlator::Correlator;
pub use manager::SessionManager;
