//! The stable error taxonomy shared by every layer of the coordinator.
//!
//! Adapters, the store, and the state machine all eventually report one of
//! these variants; the HTTP layer maps each to a fixed status code
//! (`ValidationError` -> 400, `AuthorizationError` -> 403, ...).
//! Richer, component-specific errors (see `coordinator-core::error::EngineError`)
//! convert into this taxonomy at the boundary instead of leaking their detail
//! to callers.

use thiserror::Error;

/// Canonical operation error for the marketplace coordinator.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition from {current_status}: {reason}")]
    InvalidTransition {
        current_status: String,
        reason: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authorization<S: Into<String>>(msg: S) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_transition<S: Into<String>>(current_status: S, reason: S) -> Self {
        Self::InvalidTransition {
            current_status: current_status.into(),
            reason: reason.into(),
        }
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
