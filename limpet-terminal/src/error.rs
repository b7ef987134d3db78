//! Terminal core error types

use thiserror::Error;

use shared::ServiceError;

/// Error surfaced by a mutation operation
///
/// Always names the entity and the attempted operation so the UI can
/// show a specific message.
#[derive(Debug, Error)]
pub enum MutationError {
    /// Remote call failed (after local rollback)
    #[error("{operation} failed for {entity} {entity_id}: {source}")]
    Remote {
        entity: &'static str,
        entity_id: String,
        operation: &'static str,
        #[source]
        source: ServiceError,
    },

    /// No entity to mutate (e.g. withdrawing with no open shift)
    #[error("no open {0}")]
    NoActive(&'static str),

    /// Rejected before any state change
    #[error("{operation} rejected: {reason}")]
    Invalid {
        operation: &'static str,
        reason: String,
    },
}

impl MutationError {
    pub fn remote(
        entity: &'static str,
        entity_id: impl Into<String>,
        operation: &'static str,
        source: ServiceError,
    ) -> Self {
        Self::Remote {
            entity,
            entity_id: entity_id.into(),
            operation,
            source,
        }
    }

    /// True when the underlying failure was transient (the mutation
    /// was queued for replay)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote { source, .. } if source.is_transient())
    }
}

/// Result type for mutation operations
pub type MutationResult<T> = Result<T, MutationError>;
