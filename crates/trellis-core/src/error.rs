use thiserror::Error;

use crate::types::ComponentPath;

#[derive(Debug, Error)]
pub enum TrellisError {
    // Definition errors (pre-execution, always fatal)
    #[error("Definition error: {0}")]
    Definition(String),

    // Template / expression errors
    #[error("Expression error: {0}")]
    Expression(#[from] trellis_expr::ExprError),

    // Node executor errors
    #[error("Executor not found for node kind: {0}")]
    ExecutorNotFound(String),

    #[error("Node execution failed: {path}: {message}")]
    Executor { path: ComponentPath, message: String },

    // Event channel errors
    #[error("Input event timed out after {waited_ms}ms: {path}")]
    EventTimeout { path: ComponentPath, waited_ms: u64 },

    #[error("Deferred event value was dropped without being resolved: {binding}")]
    DeferredDropped { binding: String },

    // Engine invariants
    #[error("Invalid status transition for {path}: {from} -> {to}")]
    InvalidTransition {
        path: ComponentPath,
        from: crate::types::ExecutionStatus,
        to: crate::types::ExecutionStatus,
    },

    #[error("Result already recorded for {path}")]
    DuplicateResult { path: ComponentPath },

    // Run control
    #[error("Run aborted")]
    Aborted,

    // Resume / persistence errors
    #[error("No persisted record for component: {path}")]
    MissingRecord { path: ComponentPath },

    #[error("Store error: {0}")]
    Store(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrellisError>;
