//! Engine error kinds and their stable outcome codes.

use thiserror::Error;
use wardrobe_core::artifact::ArtifactError;
use wardrobe_core::identity::IdentityError;
use wardrobe_core::storage::{CommitError, DbError};
use wardrobe_core::transaction::LifecycleError;

/// Errors returned by engine operations.
///
/// Scoped lookups report every mismatch (unknown id, wrong role, wrong
/// state) as the same [`EngineError::NotFound`], so callers cannot learn about
/// transactions they are not part of.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The record changed between read and commit.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Stable, machine-readable outcome code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage_error",
            Self::Artifact(_) => "artifact_error",
        }
    }

    pub(crate) fn transaction_not_found() -> Self {
        Self::NotFound("transaction")
    }
}

impl From<IdentityError> for EngineError {
    fn from(err: IdentityError) -> Self {
        Self::Unauthenticated(err.to_string())
    }
}

impl From<CommitError> for EngineError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Stale => Self::Conflict("transaction was modified concurrently".into()),
            CommitError::Db(e) => Self::Storage(e),
        }
    }
}

impl From<LifecycleError> for EngineError {
    fn from(err: LifecycleError) -> Self {
        Self::Conflict(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::transaction_not_found().code(), "not_found");
        assert_eq!(EngineError::Forbidden("x".into()).code(), "forbidden");
        assert_eq!(EngineError::InvalidArgument("x".into()).code(), "invalid_argument");
        assert_eq!(EngineError::Unauthenticated("x".into()).code(), "unauthenticated");
        assert_eq!(EngineError::Conflict("x".into()).code(), "conflict");
        assert_eq!(
            EngineError::Storage(DbError::NotFound("k".into())).code(),
            "storage_error"
        );
        assert_eq!(EngineError::Artifact(ArtifactError::Empty).code(), "artifact_error");
    }

    #[test]
    fn stale_commit_is_a_conflict() {
        assert!(matches!(
            EngineError::from(CommitError::Stale),
            EngineError::Conflict(_)
        ));
    }

    #[test]
    fn identity_failures_are_unauthenticated() {
        assert_eq!(EngineError::from(IdentityError::BadSignature).code(), "unauthenticated");
    }
}
