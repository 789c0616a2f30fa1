//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check identities the gateway will put on the wire
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::xmpp::Jid;

/// Largest accepted timeout, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_timeout(errors: &mut Vec<ValidationError>, field: &'static str, secs: u64) {
    if secs == 0 {
        errors.push(ValidationError::new(field, "must be > 0"));
    } else if secs > MAX_TIMEOUT_SECS {
        errors.push(ValidationError::new(
            field,
            format!("must be at most {} seconds", MAX_TIMEOUT_SECS),
        ));
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path must both be set",
            ));
        }
    }

    let xmpp = &config.xmpp;
    if xmpp.domain.is_empty() {
        errors.push(ValidationError::new("xmpp.domain", "must not be empty"));
    } else if xmpp.domain.parse::<Jid>().map(|j| j.node().is_some()).unwrap_or(true) {
        errors.push(ValidationError::new(
            "xmpp.domain",
            format!("not a domain: {}", xmpp.domain),
        ));
    }
    if xmpp.server_address.is_empty() {
        errors.push(ValidationError::new("xmpp.server_address", "must not be empty"));
    }
    if xmpp.resource.is_empty() || xmpp.resource.chars().any(char::is_whitespace) {
        errors.push(ValidationError::new(
            "xmpp.resource",
            "must be non-empty and contain no whitespace",
        ));
    }
    if let Some(service) = &xmpp.pubsub_service {
        if service.parse::<Jid>().is_err() {
            errors.push(ValidationError::new(
                "xmpp.pubsub_service",
                format!("not a valid JID: {}", service),
            ));
        }
    }
    check_timeout(&mut errors, "xmpp.connect_timeout_secs", xmpp.connect_timeout_secs);
    check_timeout(&mut errors, "xmpp.request_timeout_secs", xmpp.request_timeout_secs);
    check_timeout(
        &mut errors,
        "timeouts.http_request_secs",
        config.timeouts.http_request_secs,
    );
    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be > 0"));
    }

    let observability = &config.observability;
    if !matches!(
        observability.log_level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level: {}", observability.log_level),
        ));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
