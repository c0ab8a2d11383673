//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Identity must be in the exact form envelopes are compared against
//! - Validate value ranges (timeouts > 0, ports valid, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use uuid::Uuid;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("identity.uuid is not set")]
    MissingIdentity,
    #[error("identity.uuid {0:?} is not a lowercase hyphenated UUID")]
    NonCanonicalIdentity(String),
    #[error("upstream.fallback_host is not set")]
    MissingFallbackHost,
    #[error("{0} must not be zero")]
    Zero(&'static str),
    #[error("{field} {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },
}

/// Check a configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let identity = &config.identity.uuid;
    if identity.is_empty() {
        errors.push(ValidationError::MissingIdentity);
    } else if !is_canonical_uuid(identity) {
        errors.push(ValidationError::NonCanonicalIdentity(identity.clone()));
    }

    if config.upstream.fallback_host.trim().is_empty() {
        errors.push(ValidationError::MissingFallbackHost);
    }
    if config.upstream.fallback_port == 0 {
        errors.push(ValidationError::Zero("upstream.fallback_port"));
    }
    if config.upstream.resolver_port == 0 {
        errors.push(ValidationError::Zero("upstream.resolver_port"));
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.listener.max_tunnels == 0 {
        errors.push(ValidationError::Zero("listener.max_tunnels"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.connect_secs"));
    }
    if config.relay.buffer_size == 0 {
        errors.push(ValidationError::Zero("relay.buffer_size"));
    }
    if config.relay.frame_queue == 0 {
        errors.push(ValidationError::Zero("relay.frame_queue"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_canonical_uuid(value: &str) -> bool {
    Uuid::parse_str(value)
        .map(|id| id.hyphenated().to_string() == value)
        .unwrap_or(false)
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
