//! # Broker Error Types
//!
//! Structured error handling for the provisioning pipeline using thiserror.
//!
//! Errors fall into two families: [`AdapterError`] describes what an external
//! collaborator (CA, DNS, certificate store, load balancer, CDN, WAF, alarms)
//! reported, and [`BrokerError`] is what steps, the scheduler and the broker
//! service return. [`BrokerError::category`] is the single place that decides
//! whether a failure may be retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigurationError;

/// Failures reported by an external collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("{service}: resource not found: {resource}")]
    NotFound { service: String, resource: String },

    #[error("{service}: resource already exists: {resource}")]
    AlreadyExists { service: String, resource: String },

    /// Optimistic-lock or concurrent-modification conflict
    #[error("{service}: conflicting modification of {resource}")]
    Conflict { service: String, resource: String },

    /// Network blip, throttling, not yet propagated
    #[error("{service}: transient failure: {message}")]
    Transient { service: String, message: String },

    /// The provider refused the request for good (e.g. CA rejected the order)
    #[error("{service}: request rejected: {message}")]
    Rejected { service: String, message: String },

    #[error("{service}: {message}")]
    Other { service: String, message: String },
}

impl AdapterError {
    pub fn not_found(service: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::NotFound {
            service: service.into(),
            resource: resource.into(),
        }
    }

    pub fn already_exists(service: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            service: service.into(),
            resource: resource.into(),
        }
    }

    pub fn conflict(service: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::Conflict {
            service: service.into(),
            resource: resource.into(),
        }
    }

    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn other(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Helpers for teardown paths where a missing resource means the work is done
pub trait AdapterResultExt<T> {
    /// Map `NotFound` to `Ok(None)`
    fn ignore_not_found(self) -> AdapterResult<Option<T>>;
}

impl<T> AdapterResultExt<T> for AdapterResult<T> {
    fn ignore_not_found(self) -> AdapterResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => {
                tracing::debug!(error = %e, "Treating missing resource as already removed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Top-level error type for pipeline steps and broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out waiting for {operation} after {attempts} attempts")]
    PollTimeout { operation: String, attempts: u32 },

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    Queue(String),
}

impl BrokerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn poll_timeout(operation: impl Into<String>, attempts: u32) -> Self {
        Self::PollTimeout {
            operation: operation.into(),
            attempts,
        }
    }

    /// Classify this error for retry decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Database(_) | Self::Queue(_) | Self::PollTimeout { .. } => {
                ErrorCategory::Transient
            }
            Self::Adapter(adapter) => match adapter {
                AdapterError::NotFound { .. } => ErrorCategory::NotFound,
                AdapterError::Conflict { .. } => ErrorCategory::Conflict,
                AdapterError::Rejected { .. } => ErrorCategory::Permanent,
                AdapterError::AlreadyExists { .. }
                | AdapterError::Transient { .. }
                | AdapterError::Other { .. } => ErrorCategory::Transient,
            },
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Migration(_) | Self::Crypto(_) | Self::Serialization(_) => {
                ErrorCategory::Permanent
            }
            Self::NotFound { .. } | Self::InvalidState(_) => ErrorCategory::StateInconsistency,
            Self::Validation(_) => ErrorCategory::Permanent,
        }
    }

    /// Whether a retriable step may be attempted again after this error
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Error categories used by the scheduler's retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Will never succeed if retried
    Permanent,
    /// May succeed on retry
    Transient,
    /// A resource the step needed is missing
    NotFound,
    /// Concurrent modification, retry after re-reading
    Conflict,
    /// Requires operator intervention
    Configuration,
    /// Persisted state does not match what the step expects
    StateInconsistency,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::NotFound | Self::Conflict)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::Transient => write!(f, "transient"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Configuration => write!(f, "configuration"),
            Self::StateInconsistency => write!(f, "state_inconsistency"),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_errors_are_classified() {
        let rejected: BrokerError = AdapterError::rejected("acme", "order invalid").into();
        assert_eq!(rejected.category(), ErrorCategory::Permanent);
        assert!(!rejected.is_retryable());

        let throttled: BrokerError = AdapterError::transient("dns", "rate exceeded").into();
        assert!(throttled.is_retryable());

        let conflict: BrokerError = AdapterError::conflict("waf", "web acl").into();
        assert_eq!(conflict.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_state_errors_are_not_retried() {
        assert!(!BrokerError::invalid_state("no new certificate").is_retryable());
        assert!(!BrokerError::validation("bad domain").is_retryable());
        assert!(BrokerError::poll_timeout("dns change", 10).is_retryable());
    }

    #[test]
    fn test_ignore_not_found() {
        let missing: AdapterResult<()> = Err(AdapterError::not_found("cdn", "E123"));
        assert_eq!(missing.ignore_not_found().unwrap(), None);

        let present: AdapterResult<u8> = Ok(7);
        assert_eq!(present.ignore_not_found().unwrap(), Some(7));

        let failed: AdapterResult<()> = Err(AdapterError::transient("cdn", "timeout"));
        assert!(failed.ignore_not_found().is_err());
    }
}
