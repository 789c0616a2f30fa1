//! Publish/subscribe subscription management.
//!
//! # Responsibilities
//! - Address nodes and build the requests that read or change their
//!   subscriber lists
//! - Parse the replies and merge them into one role map
//! - Run the read-modify-read sequences behind the HTTP endpoints

pub mod node;
pub mod roles;
pub mod service;
pub mod stanza;

pub use node::NodeAddress;
pub use roles::{merge_roles, Affiliation, Role, RoleMap, Subscription, SubscriptionState};
pub use service::SubscriptionService;
pub use stanza::{Operation, StanzaBuilder};
