//! Error types for provisioning.
//!
//! Configuration-time errors (cycles, unresolved references, duplicates)
//! abort a planning pass before any side effect. Runtime errors are scoped
//! to a single resource and surface through the execution report.

use crate::types::{ProvisioningState, ResourceAddress};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning or executing.
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency graph contains a cycle
    #[error("dependency cycle: {}", join(.cycle, " -> "))]
    CyclicDependency {
        /// Addresses along the cycle, first element repeated at the end
        cycle: Vec<ResourceAddress>,
    },

    /// A descriptor references an address that is not declared
    #[error("{from} references undeclared resource {to}")]
    UnresolvedReference {
        from: ResourceAddress,
        to: ResourceAddress,
    },

    /// Two descriptors share an address
    #[error("resource {0} is declared more than once")]
    DuplicateResource(ResourceAddress),

    /// Malformed `<type>.<name>` address
    #[error("invalid resource address '{0}': expected <type>.<name>")]
    InvalidAddress(String),

    /// A resource failed to reach Ready
    #[error("provisioning {address} failed: {message}")]
    ProvisioningFailure {
        address: ResourceAddress,
        message: String,
    },

    /// Destroy would remove a resource that something still depends on
    #[error("cannot delete {resource}: still referenced by {}", join(.dependents, ", "))]
    DependencyStillPresent {
        resource: ResourceAddress,
        dependents: Vec<ResourceAddress>,
    },

    /// Error returned by the external provisioning API
    #[error(transparent)]
    ExternalApi(#[from] ApiError),

    /// Lifecycle transition not allowed by the state machine
    #[error("{address}: illegal state transition {from} -> {to}")]
    InvalidTransition {
        address: ResourceAddress,
        from: ProvisioningState,
        to: ProvisioningState,
    },

    /// Operation did not reach a terminal state in time
    #[error("{address} did not reach a terminal state within {timeout:?}")]
    TimedOut {
        address: ResourceAddress,
        timeout: Duration,
    },

    /// Worker pool could not be created
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl Error {
    /// Whether this error is detected before any provider call is made.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::UnresolvedReference { .. }
                | Self::DuplicateResource(_)
                | Self::InvalidAddress(_)
        )
    }
}

fn join(addresses: &[ResourceAddress], sep: &str) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

fn status_suffix(code: &Option<u16>) -> String {
    code.map(|c| format!(" ({c})")).unwrap_or_default()
}

/// Classification of an external API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Throttling, timeouts, server errors; re-running the apply may succeed
    Transient,
    /// Validation, authorization, conflicts
    Permanent,
    /// The remote object does not exist
    NotFound,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
            Self::NotFound => f.write_str("not found"),
        }
    }
}

/// Error from the provisioning API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} API error{}: {message}", status_suffix(.code))]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// Status code reported by the API, when there is one
    pub code: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Transient,
            code: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Permanent,
            code: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::NotFound,
            code: Some(404),
            message: message.into(),
        }
    }

    /// Classify by HTTP-style status code: 408, 429 and 5xx are transient.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            404 => ApiErrorKind::NotFound,
            408 | 429 | 500..=599 => ApiErrorKind::Transient,
            _ => ApiErrorKind::Permanent,
        };
        Self {
            kind,
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ApiErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ApiError::from_status(429, "throttled").is_transient());
        assert!(ApiError::from_status(503, "unavailable").is_transient());
        assert!(ApiError::from_status(408, "timeout").is_transient());
        assert!(!ApiError::from_status(400, "bad request").is_transient());
        assert!(!ApiError::from_status(409, "conflict").is_transient());
        assert!(ApiError::from_status(404, "gone").is_not_found());
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::from_status(409, "subnet in use");
        assert_eq!(err.to_string(), "permanent API error (409): subnet in use");
        assert_eq!(
            ApiError::transient("reset").to_string(),
            "transient API error: reset"
        );
    }

    #[test]
    fn test_cycle_display() {
        let a = ResourceAddress::new("t", "a");
        let b = ResourceAddress::new("t", "b");
        let err = Error::CyclicDependency {
            cycle: vec![a.clone(), b, a],
        };
        assert_eq!(err.to_string(), "dependency cycle: t.a -> t.b -> t.a");
        assert!(err.is_configuration_error());
    }
}
