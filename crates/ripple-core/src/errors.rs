//! Error types for the Ripple core library.

use crate::models::ChangeStatus;

/// Top-level error enum for the Ripple core library.
#[derive(Debug, thiserror::Error)]
pub enum RippleError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A workflow action was refused. The change request is left untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("user {user_id} is not allowed to {action}")]
    Unauthorized { user_id: String, action: &'static str },

    #[error("cannot {action} a change request in status {status}")]
    InvalidTransition {
        status: ChangeStatus,
        action: &'static str,
    },

    #[error("{unresolved} impact(s) still need acknowledgement before approval")]
    UnresolvedImpacts { unresolved: usize },

    #[error("parser-detected impacts must be acknowledged, not dismissed")]
    DismissalNotAllowed,

    #[error("impact {0} is already resolved")]
    AlreadyResolved(String),
}

pub type RippleResult<T> = Result<T, RippleError>;
