//! Roles on a node and the merge of affiliations with subscriptions.
//!
//! # Design Decisions
//! - The merge is a pure function of two snapshots taken from the server;
//!   nothing is remembered between calls
//! - An explicit affiliation always wins over subscription state
//! - A subject listed twice in the affiliation list is an error, never
//!   collapsed

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{GatewayError, Result};

/// Role of a subject on a node, as reported to HTTP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Owner,
    Moderator,
    Publisher,
    PublishOnly,
    Member,
    Subscriber,
    Outcast,
    None,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Moderator => "moderator",
            Role::Publisher => "publisher",
            Role::PublishOnly => "publish-only",
            Role::Member => "member",
            Role::Subscriber => "subscriber",
            Role::Outcast => "outcast",
            Role::None => "none",
        }
    }
}

impl FromStr for Role {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "owner" => Ok(Role::Owner),
            "moderator" => Ok(Role::Moderator),
            "publisher" => Ok(Role::Publisher),
            "publish-only" => Ok(Role::PublishOnly),
            "member" => Ok(Role::Member),
            "subscriber" => Ok(Role::Subscriber),
            "outcast" => Ok(Role::Outcast),
            "none" => Ok(Role::None),
            other => Err(GatewayError::Protocol(format!("unknown affiliation: {}", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An owner-granted role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affiliation {
    pub jid: String,
    pub role: Role,
}

impl Affiliation {
    pub fn new(jid: impl Into<String>, role: Role) -> Self {
        Self {
            jid: jid.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Pending,
    Unconfigured,
    None,
}

impl FromStr for SubscriptionState {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "subscribed" => Ok(SubscriptionState::Subscribed),
            "pending" => Ok(SubscriptionState::Pending),
            "unconfigured" => Ok(SubscriptionState::Unconfigured),
            "none" => Ok(SubscriptionState::None),
            other => Err(GatewayError::Protocol(format!(
                "unknown subscription state: {}",
                other
            ))),
        }
    }
}

/// A subject's subscription to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub jid: String,
    pub subid: Option<String>,
    pub state: SubscriptionState,
}

/// Subject identity → role. Serialized as a JSON object.
pub type RoleMap = BTreeMap<String, Role>;

/// Merge an affiliation list with a subscription list.
///
/// Affiliations with role `none` are left out. Subjects that are
/// `subscribed` and have no other role show up as subscribers; several
/// subscriptions of the same subject count once.
pub fn merge_roles(affiliations: &[Affiliation], subscriptions: &[Subscription]) -> Result<RoleMap> {
    let mut roles = RoleMap::new();
    let mut seen = std::collections::HashSet::new();

    for affiliation in affiliations {
        if !seen.insert(affiliation.jid.as_str()) {
            return Err(GatewayError::Protocol(format!(
                "duplicate affiliation for {}",
                affiliation.jid
            )));
        }
        if affiliation.role != Role::None {
            roles.insert(affiliation.jid.clone(), affiliation.role);
        }
    }

    for subscription in subscriptions {
        if subscription.state == SubscriptionState::Subscribed {
            roles
                .entry(subscription.jid.clone())
                .or_insert(Role::Subscriber);
        }
    }

    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(jid: &str, subid: &str, state: SubscriptionState) -> Subscription {
        Subscription {
            jid: jid.to_string(),
            subid: Some(subid.to_string()),
            state,
        }
    }

    #[test]
    fn affiliations_pass_through_without_none() {
        let roles = merge_roles(
            &[
                Affiliation::new("alice@localhost", Role::Owner),
                Affiliation::new("bob@localhost", Role::Subscriber),
                Affiliation::new("mallory@localhost", Role::None),
            ],
            &[],
        )
        .unwrap();

        assert_eq!(roles.len(), 2);
        assert_eq!(roles["alice@localhost"], Role::Owner);
        assert_eq!(roles["bob@localhost"], Role::Subscriber);
    }

    #[test]
    fn duplicate_affiliation_is_reported() {
        let err = merge_roles(
            &[
                Affiliation::new("alice@localhost", Role::Owner),
                Affiliation::new("alice@localhost", Role::Member),
            ],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }

    #[test]
    fn subscribed_subjects_without_role_become_subscribers() {
        let roles = merge_roles(
            &[
                Affiliation::new("alice@localhost", Role::Owner),
                Affiliation::new("carol@localhost", Role::None),
                Affiliation::new("mallory@localhost", Role::Outcast),
            ],
            &[
                subscription("alice@localhost", "s1", SubscriptionState::Subscribed),
                subscription("carol@localhost", "s2", SubscriptionState::Subscribed),
                subscription("dave@localhost", "s3", SubscriptionState::Subscribed),
                subscription("dave@localhost", "s4", SubscriptionState::Subscribed),
                subscription("erin@localhost", "s5", SubscriptionState::Pending),
                subscription("mallory@localhost", "s6", SubscriptionState::Subscribed),
            ],
        )
        .unwrap();

        assert_eq!(roles["alice@localhost"], Role::Owner);
        assert_eq!(roles["carol@localhost"], Role::Subscriber);
        assert_eq!(roles["dave@localhost"], Role::Subscriber);
        assert_eq!(roles["mallory@localhost"], Role::Outcast);
        assert!(!roles.contains_key("erin@localhost"));
        assert_eq!(roles.len(), 4);
    }

    #[test]
    fn serializes_as_object_of_strings() {
        let roles = merge_roles(
            &[
                Affiliation::new("alice@localhost", Role::Owner),
                Affiliation::new("bob@localhost", Role::PublishOnly),
            ],
            &[],
        )
        .unwrap();
        let json = serde_json::to_value(&roles).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"alice@localhost": "owner", "bob@localhost": "publish-only"})
        );
    }

    #[test]
    fn unknown_values_are_protocol_errors() {
        assert!(matches!("admin".parse::<Role>(), Err(GatewayError::Protocol(_))));
        assert!(matches!(
            "maybe".parse::<SubscriptionState>(),
            Err(GatewayError::Protocol(_))
        ));
        assert_eq!("publish-only".parse::<Role>().unwrap(), Role::PublishOnly);
    }
}
