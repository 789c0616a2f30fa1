//! Node addressing.

use std::fmt;

use crate::error::{GatewayError, Result};
use crate::xmpp::Jid;

/// A node identified by its owner and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    owner: Jid,
    name: String,
}

impl NodeAddress {
    /// Validate the two path segments of `/channels/{owner}/{node}`.
    pub fn new(owner: &str, name: &str) -> Result<Self> {
        if owner.is_empty() {
            return Err(GatewayError::BadRequest("empty node owner".into()));
        }
        let owner: Jid = owner.parse()?;
        if owner.node().is_none() {
            return Err(GatewayError::BadRequest(format!(
                "node owner must be a user identity: {}",
                owner
            )));
        }

        if name.is_empty() {
            return Err(GatewayError::BadRequest("empty node name".into()));
        }
        if name.chars().any(|c| c == '/' || c.is_whitespace() || c.is_control()) {
            return Err(GatewayError::BadRequest(format!("invalid node name: {:?}", name)));
        }

        Ok(Self {
            owner: owner.bare(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &Jid {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node identifier used on the wire.
    pub fn path(&self) -> String {
        format!("/user/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}
