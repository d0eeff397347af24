//! Error taxonomy for memory curation.

use memcurate_state::StorageError;

/// Curation errors.
///
/// `Validation`, `NotFound`, `ProtectedMemory`, `SessionClosed` and
/// `DeadlineExceeded` are returned to the driver as structured results and
/// leave the session usable. The rest are fatal for the caller.
#[derive(Debug, thiserror::Error)]
pub enum CurationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("memory not found: {memory_id}")]
    NotFound { memory_id: String },

    #[error("memory {memory_id} is constitutional; unprotect it first")]
    ProtectedMemory { memory_id: String },

    #[error("session {session_id} is closed ({status})")]
    SessionClosed { session_id: String, status: String },

    #[error("session {session_id} passed its deadline; only complete is accepted")]
    DeadlineExceeded { session_id: String },

    /// The rollback transaction failed. Nothing from it was applied.
    #[error("rollback of session {session_id} failed: {reason}")]
    RollbackFailed { session_id: String, reason: String },

    #[error("audit entry {entry_id} cannot be compensated: {reason}")]
    CorruptAuditTrail { entry_id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CurationError {
    /// Stable snake_case code used in structured driver results.
    pub fn kind(&self) -> &'static str {
        match self {
            CurationError::Validation(_) => "validation",
            CurationError::NotFound { .. } => "not_found",
            CurationError::ProtectedMemory { .. } => "protected_memory",
            CurationError::SessionClosed { .. } => "session_closed",
            CurationError::DeadlineExceeded { .. } => "deadline_exceeded",
            CurationError::RollbackFailed { .. } => "rollback_failed",
            CurationError::CorruptAuditTrail { .. } => "corrupt_audit_trail",
            CurationError::Config(_) => "config",
            CurationError::Storage(_) => "storage",
            CurationError::Serialization(_) => "serialization",
            CurationError::Io(_) => "io",
        }
    }

    /// Whether the error must be surfaced to the operator instead of the driver.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CurationError::Validation(_)
                | CurationError::NotFound { .. }
                | CurationError::ProtectedMemory { .. }
                | CurationError::SessionClosed { .. }
                | CurationError::DeadlineExceeded { .. }
        )
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        CurationError::Validation(msg.into())
    }
}

/// Result type for curation operations.
pub type Result<T> = std::result::Result<T, CurationError>;
