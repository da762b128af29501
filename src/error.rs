//! Domain error taxonomy shared across all actors.
//!
//! Actor command handlers return `CoreError` so callers can match on
//! `kind` the way spec.md §7 requires. There is no REST/CLI boundary in
//! this crate (out of scope per spec.md) to justify the teacher's
//! looser `anyhow::Result` glue at call sites that only propagate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("actor {key} has not been initialized")]
    NotInitialized { key: String },

    #[error("invalid state transition on {key}: {message}")]
    InvalidStateTransition { key: String, message: String },

    #[error("precondition violated: {message}")]
    PreconditionViolation { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("external service rejected the request terminally: {message}")]
    TerminalExternal { message: String, error_code: &'static str },

    #[error("external service failed transiently: {message}")]
    TransientExternal { message: String },

    #[error("circuit open for processor {processor}")]
    CircuitOpen { processor: String },

    #[error("persistence failure on {key}: {message}")]
    PersistenceFailure { key: String, message: String },
}

impl CoreError {
    pub fn not_initialized(key: impl Into<String>) -> Self {
        Self::NotInitialized { key: key.into() }
    }

    pub fn invalid_transition(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn persistence(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PersistenceFailure {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Stable, caller-visible code, matching spec.md §7 "User-visible".
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized { .. } => "NOT_INITIALIZED",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::PreconditionViolation { .. } => "PRECONDITION_VIOLATION",
            Self::Conflict { .. } => "CONFLICT",
            Self::TerminalExternal { error_code, .. } => error_code,
            Self::TransientExternal { .. } => "TRANSIENT_EXTERNAL",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::PersistenceFailure { .. } => "PERSISTENCE_FAILURE",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExternal { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
