use thiserror::Error;

use crate::access::{DirectoryError, SignatureError};
use crate::documents::RenderError;
use crate::petitions::LifecycleViolation;
use crate::store::StoreError;

/// Error returned by every engine operation. Transitions are all-or-nothing:
/// whenever one of these is returned, nothing the operation wrote is visible.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("concurrent update detected: {detail}")]
    Conflict { detail: String },

    #[error("document generation failed: {0}")]
    DownstreamFailure(#[from] RenderError),

    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl WorkflowError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        WorkflowError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        WorkflowError::Forbidden {
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(detail: impl Into<String>) -> Self {
        WorkflowError::Conflict {
            detail: detail.into(),
        }
    }

    /// The operation was fully rolled back and may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Conflict { .. } | WorkflowError::Storage(_))
    }

    /// Short machine-readable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "not_found",
            WorkflowError::Forbidden { .. } => "forbidden",
            WorkflowError::InvalidState(_) => "invalid_state",
            WorkflowError::ValidationFailed(_) => "validation_failed",
            WorkflowError::PreconditionFailed(_) => "precondition_failed",
            WorkflowError::Conflict { .. } => "conflict",
            WorkflowError::DownstreamFailure(_) => "downstream_failure",
            WorkflowError::Storage(_) => "storage",
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        if err.is_contention() {
            WorkflowError::conflict(err.to_string())
        } else {
            WorkflowError::Storage(err)
        }
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(err).into()
    }
}

impl From<LifecycleViolation> for WorkflowError {
    fn from(err: LifecycleViolation) -> Self {
        WorkflowError::InvalidState(err.to_string())
    }
}

impl From<DirectoryError> for WorkflowError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Lookup(e) => e.into(),
            DirectoryError::InvalidEntry(e) => WorkflowError::Storage(StoreError::Corrupt {
                column: "approver_role",
                reason: e.to_string(),
            }),
        }
    }
}

impl From<SignatureError> for WorkflowError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::Lookup(e) => e.into(),
        }
    }
}
