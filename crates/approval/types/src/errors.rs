//! Error types for the approval layer

use crate::{ApproverType, InstanceId, RequestType, StepId};

/// Errors surfaced by approval operations
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// Malformed template or request
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// No principal resolves for an approver type. The engine turns this
    /// into a Blocked instance instead of failing the caller.
    #[error("No approver could be resolved for {approver_type} at step {step_id}")]
    UnresolvedApprover {
        step_id: StepId,
        approver_type: ApproverType,
    },

    /// Wrong actor, wrong step, or wrong status for the attempted operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Step already decided: {0}")]
    StepAlreadyDecided(StepId),

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Step {step_id} not found in instance {instance_id}")]
    StepNotFound {
        instance_id: InstanceId,
        step_id: StepId,
    },

    #[error("No template registered for request type: {0}")]
    TemplateNotFound(RequestType),

    /// An optimistic-lock collision that outlived the retry budget
    #[error("Concurrency conflict on instance {instance_id} (expected version {expected})")]
    ConcurrencyConflict {
        instance_id: InstanceId,
        expected: u64,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApprovalError {
    /// Whether this is one of the not-found variants
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::InstanceNotFound(_) | Self::StepNotFound { .. } | Self::TemplateNotFound(_)
        )
    }

    /// Whether retrying with fresh state might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Errors reported by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// The stored version differs from the one the writer read
    #[error("version conflict on {key}: expected {expected}, found {found}")]
    VersionConflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// A commit tried to fire a reminder that is already fired
    #[error("reminder already fired: {0}")]
    AlreadyFired(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
