//! Error types shared across the reconciliation and sync engines.

use thiserror::Error;

use crate::persistence::PersistenceError;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by entity services and engines.
///
/// Entity-level mutations return these as values so callers can present
/// inline feedback; only persistence-layer I/O failures travel through the
/// `Persistence` variant.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any mutation took place.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist; no other state was touched.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Actor is neither owner of nor shared-with on the target entity.
    #[error("actor '{actor}' is not permitted to modify {entity} '{id}'")]
    PermissionDenied {
        actor: String,
        entity: &'static str,
        id: String,
    },

    /// A stored document could not be normalized into its entity shape.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Persistence service failure (network, local cache I/O).
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn permission_denied(
        actor: impl Into<String>,
        entity: &'static str,
        id: impl Into<String>,
    ) -> Self {
        Self::PermissionDenied {
            actor: actor.into(),
            entity,
            id: id.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// True when retrying the same call later could succeed.
    ///
    /// Used by the drain loop to describe why it halted; validation and
    /// permission failures are permanent, I/O failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_errors_are_retryable() {
        let err = Error::from(PersistenceError::unavailable("socket closed"));
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_errors_are_permanent() {
        assert!(!Error::validation("amount must be non-negative").is_retryable());
    }
}
