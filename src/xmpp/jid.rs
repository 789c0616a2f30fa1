//! Network identities (JIDs).
//!
//! # Format
//! ```text
//! [node@]domain[/resource]
//! ```
//!
//! Validation is structural only: no stringprep, but characters the address
//! format forbids in the local part are rejected, as is any whitespace.

use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

const MAX_PART_LEN: usize = 1023;
const FORBIDDEN_IN_NODE: &[char] = &['"', '&', '\'', '/', ':', '<', '>', '@'];

/// A parsed JID, bare or full.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Local part, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// The same identity without its resource.
    pub fn bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// The same identity bound to `resource`.
    pub fn with_resource(&self, resource: &str) -> Result<Jid, GatewayError> {
        check_part("resource", resource)?;
        Ok(Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: Some(resource.to_string()),
        })
    }
}

fn check_part(what: &str, part: &str) -> Result<(), GatewayError> {
    if part.is_empty() {
        return Err(GatewayError::BadRequest(format!("empty {} in JID", what)));
    }
    if part.len() > MAX_PART_LEN {
        return Err(GatewayError::BadRequest(format!("{} too long in JID", what)));
    }
    if part.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(GatewayError::BadRequest(format!("invalid character in JID {}", what)));
    }
    Ok(())
}

impl FromStr for Jid {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, resource) = match s.split_once('/') {
            Some((rest, resource)) => (rest, Some(resource)),
            None => (s, None),
        };
        let (node, domain) = match rest.split_once('@') {
            Some((node, domain)) => (Some(node), domain),
            None => (None, rest),
        };

        if let Some(node) = node {
            check_part("node", node)?;
            if node.contains(FORBIDDEN_IN_NODE) {
                return Err(GatewayError::BadRequest(format!("invalid JID node: {}", node)));
            }
        }
        check_part("domain", domain)?;
        if domain.contains('@') {
            return Err(GatewayError::BadRequest(format!("invalid JID domain: {}", domain)));
        }
        if let Some(resource) = resource {
            check_part("resource", resource)?;
        }

        Ok(Jid {
            node: node.map(str::to_string),
            domain: domain.to_ascii_lowercase(),
            resource: resource.map(str::to_string),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "{}@", node)?;
        }
        write!(f, "{}", self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}
