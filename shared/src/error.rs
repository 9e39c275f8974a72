use std::time::Duration;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::PoolError;
use thiserror::Error;
use uuid::Uuid;

/// Failures of the local transactional store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write; the logical row already exists.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A compare-and-set update found the row in a different version.
    #[error("concurrent modification of {0}")]
    Conflict(String),

    /// The store could not be reached or the unit of work was aborted.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted value could not be mapped back into the domain.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_) | StoreError::Conflict(_))
    }
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::UniqueViolation(info.message().to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<bb8::RunError<PoolError>> for StoreError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Illegal domain transitions and invalid aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("{entity} {id}: {reason}")]
    InvariantViolation {
        entity: &'static str,
        id: Uuid,
        reason: String,
    },

    #[error("invalid order: {0}")]
    OrderValidation(String),
}

impl DomainError {
    pub fn violation(entity: &'static str, id: Uuid, reason: impl Into<String>) -> Self {
        DomainError::InvariantViolation {
            entity,
            id,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
}

/// Everything a message or request handler can fail with.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("undecodable message on {topic}: {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no handler for topic {0}")]
    UnknownTopic(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("handler did not finish within {0:?}")]
    Timeout(Duration),
}

impl ServiceError {
    /// Whether the bus should hand the message out again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Store(StoreError::Unavailable(_)) | ServiceError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Store(StoreError::Serialization(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_redelivered() {
        assert!(ServiceError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(ServiceError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ServiceError::Domain(DomainError::OrderValidation("x".into())).is_retryable());
        assert!(!ServiceError::Store(StoreError::Corrupt("bad".into())).is_retryable());
        assert!(!ServiceError::UnknownTopic("t".into()).is_retryable());
    }

    #[test]
    fn unique_violation_maps_from_diesel() {
        let err = StoreError::from(DieselError::NotFound);
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(StoreError::UniqueViolation("k".into()).is_duplicate());
        assert!(StoreError::Conflict("k".into()).is_duplicate());
    }
}
