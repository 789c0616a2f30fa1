//! HTTP Basic credentials.
//!
//! The username is the caller's JID (bare or full), the password its
//! account secret. Both are passed on to the XMPP handshake unchanged.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{GatewayError, Result};
use crate::xmpp::Jid;

/// Credentials taken from the `Authorization: Basic` header.
#[derive(Clone)]
pub struct BasicCredentials {
    pub jid: Jid,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicCredentials {
    /// Parse an `Authorization` header value.
    pub fn parse(header: &str) -> Result<Self> {
        let (scheme, encoded) = header
            .trim()
            .split_once(' ')
            .ok_or_else(|| malformed("expected '<scheme> <credentials>'"))?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(malformed("only Basic authentication is supported"));
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| malformed("credentials are not valid base64"))?;
        let decoded = String::from_utf8(decoded).map_err(|_| malformed("credentials are not UTF-8"))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| malformed("missing ':' between user and password"))?;

        let jid: Jid = username
            .parse()
            .map_err(|_| malformed("username is not a valid JID"))?;
        if jid.node().is_none() {
            return Err(malformed("username must be a user JID"));
        }

        Ok(Self {
            jid,
            password: password.to_string(),
        })
    }
}

fn malformed(reason: &str) -> GatewayError {
    GatewayError::Authentication(reason.to_string())
}

impl<S> FromRequestParts<S> for BasicCredentials
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| GatewayError::Authentication("missing credentials".into()))?
            .to_str()
            .map_err(|_| malformed("authorization header is not ASCII"))?;
        Self::parse(header)
    }
}
