//! Engine error kinds.
//!
//! The parser and analyzer never raise past their component boundary; they
//! collect structured failures instead. The kinds below cover the remaining
//! failure paths that must map to process exit codes.

use thiserror::Error;

/// Fatal error kinds surfaced by the orchestrator and the store.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or unreadable input, unknown selector, invalid run id.
    #[error("input error: {0}")]
    Input(String),

    /// Schema or invariant violation while persisting a run.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The run was cancelled before persistence completed.
    #[error("run cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn input(msg: impl Into<String>) -> Self {
        EngineError::Input(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        EngineError::Persistence(msg.into())
    }
}
