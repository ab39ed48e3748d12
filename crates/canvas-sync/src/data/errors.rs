//! Error types for the canvas synchronization core

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a network call never reached a working backend.
///
/// The remedy differs per variant (fix the host name, start the server,
/// switch protocol), so callers keep them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkFailure {
    /// Host resolved but refused or dropped the connection.
    Unreachable,
    /// Host name could not be resolved.
    Dns,
    /// TLS handshake or certificate validation failed.
    Tls,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkFailure::Unreachable => write!(f, "host unreachable"),
            NetworkFailure::Dns => write!(f, "DNS lookup failed"),
            NetworkFailure::Tls => write!(f, "TLS/certificate failure"),
        }
    }
}

impl NetworkFailure {
    /// Classify a transport error message by walking its text for known markers.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("dns")
            || lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
            || lower.contains("nodename nor servname")
            || lower.contains("no such host")
        {
            NetworkFailure::Dns
        } else if lower.contains("certificate")
            || lower.contains("tls")
            || lower.contains("ssl")
            || lower.contains("handshake")
        {
            NetworkFailure::Tls
        } else {
            NetworkFailure::Unreachable
        }
    }
}

/// Error type returned by every [`GraphAdapter`](crate::traits::GraphAdapter) call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Not connected to a graph database")]
    NotConnected,
    #[error("Network error ({0}): {1}")]
    Network(NetworkFailure, String),
    #[error("Timed out after {secs}s waiting for {what}", secs = .after.as_secs())]
    Timeout { what: String, after: Duration },
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Graph query execution error: {0}")]
    QueryError(String),
    #[error("Data mapping error from graph result: {0}")]
    MappingError(String),
    #[error("Transaction error: {0}")]
    TransactionError(String),
    #[error(
        "{operation} of relationship {relationship_id} partially applied: {detail}; \
         the relationship was deleted and not recreated"
    )]
    PartialFailure {
        operation: String,
        relationship_id: String,
        detail: String,
    },
}

impl AdapterError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        AdapterError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Coarse classification used for user-facing notifications.
    pub fn kind(&self) -> FailureKind {
        match self {
            AdapterError::NotConnected => FailureKind::NotConnected,
            AdapterError::Network(..) => FailureKind::Network,
            AdapterError::Timeout { .. } => FailureKind::Timeout,
            AdapterError::Authentication(_) => FailureKind::Authentication,
            AdapterError::ConstraintViolation(_) => FailureKind::Constraint,
            AdapterError::InvalidInput(_) => FailureKind::Validation,
            AdapterError::PartialFailure { .. } => FailureKind::PartialFailure,
            AdapterError::NotFound(_)
            | AdapterError::QueryError(_)
            | AdapterError::MappingError(_)
            | AdapterError::TransactionError(_) => FailureKind::Backend,
        }
    }
}

/// Failure categories surfaced to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Constraint,
    NotConnected,
    Network,
    Timeout,
    Authentication,
    PartialFailure,
    Validation,
    Backend,
}

impl FailureKind {
    /// Short headline shown ahead of the detail text.
    pub fn headline(&self) -> &'static str {
        match self {
            FailureKind::Constraint => "Name already taken",
            FailureKind::NotConnected => "Not connected to a database",
            FailureKind::Network => "Database unreachable",
            FailureKind::Timeout => "Database did not answer in time",
            FailureKind::Authentication => "Database rejected the credentials",
            FailureKind::PartialFailure => "Change partially applied, manual repair needed",
            FailureKind::Validation => "Invalid value",
            FailureKind::Backend => "Database error",
        }
    }
}

/// Local validation failures: the intent was rejected before any state
/// change and before any backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationRejected {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Edge not found: {0}")]
    EdgeNotFound(String),
    #[error("A node cannot be connected to itself: {0}")]
    SelfLoop(String),
    #[error("Edge endpoint does not exist: {0}")]
    MissingEndpoint(String),
    #[error("Label must not be empty")]
    EmptyLabel,
    #[error("Property key must not be empty")]
    EmptyKey,
    #[error("Invalid label '{0}': only letters, digits and underscores are allowed")]
    InvalidLabel(String),
    #[error("Endpoint {0} is a draft and must be committed first")]
    DraftEndpoint(String),
    #[error("Entity {0} has a pending database operation")]
    Busy(String),
    #[error("Not connected to a graph database")]
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_display() {
        let error = AdapterError::Network(NetworkFailure::Dns, "no such host".into());
        assert_eq!(format!("{}", error), "Network error (DNS lookup failed): no such host");

        let error = AdapterError::timeout("connection test", Duration::from_secs(5));
        assert_eq!(format!("{}", error), "Timed out after 5s waiting for connection test");
    }

    #[test]
    fn test_network_failure_classification() {
        assert_eq!(
            NetworkFailure::classify("error trying to connect: dns error: failed to lookup address information"),
            NetworkFailure::Dns
        );
        assert_eq!(
            NetworkFailure::classify("invalid peer certificate: UnknownIssuer"),
            NetworkFailure::Tls
        );
        assert_eq!(
            NetworkFailure::classify("tcp connect error: Connection refused (os error 111)"),
            NetworkFailure::Unreachable
        );
    }

    #[test]
    fn test_kinds_are_distinguishable() {
        assert_eq!(AdapterError::ConstraintViolation("x".into()).kind(), FailureKind::Constraint);
        assert_eq!(AdapterError::NotConnected.kind(), FailureKind::NotConnected);
        assert_eq!(AdapterError::QueryError("x".into()).kind(), FailureKind::Backend);
        assert_ne!(FailureKind::Constraint.headline(), FailureKind::Backend.headline());
        assert_ne!(FailureKind::NotConnected.headline(), FailureKind::Backend.headline());
    }
}
