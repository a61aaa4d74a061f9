//! Component-level error type for the coordinator.
//!
//! Covers adapter faults, config faults, timeouts, and serialization, but
//! converts into `marketplace_core::CoreError` at the boundary every
//! public method of this crate exposes, so callers outside this crate
//! only ever see the stable taxonomy.

use marketplace_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("escrow adapter error: {0}")]
    Escrow(String),

    #[error("identity adapter error: {0}")]
    Identity(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: i64, actual: i64 },

    #[error("depositor mismatch: expected {expected}, got {actual}")]
    DepositorMismatch { expected: String, actual: String },

    #[error("already deposited for task {0}")]
    AlreadyDeposited(String),

    #[error("already settled for task {0}")]
    AlreadySettled(String),

    #[error("escrow not held for task {0}")]
    NotHeld(String),

    #[error("insufficient funds: needed {needed}, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    #[error("not registered: {0}")]
    NotRegistered(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EngineError {
    pub fn escrow<S: Into<String>>(msg: S) -> Self {
        Self::Escrow(msg.into())
    }

    pub fn identity<S: Into<String>>(msg: S) -> Self {
        Self::Identity(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// True for faults the dispatcher's retry loop should back off and
    /// retry on; false for faults that should abort immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Timeout(_))
    }
}

/// Maps every `EngineError` variant onto the stable taxonomy of. Adapter
/// and store faults become `BackendUnavailable`/`Conflict`/`NotFound` as
/// appropriate; nothing escapes as `Internal` unless it genuinely is one.
impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Core(e) => e,
            EngineError::BackendUnavailable(msg) => CoreError::backend_unavailable(msg),
            EngineError::Timeout(d) => CoreError::backend_unavailable(format!("timed out after {d:?}")),
            EngineError::AmountMismatch { expected, actual } => CoreError::validation(format!(
                "amount mismatch: expected {expected}, got {actual}"
            )),
            EngineError::DepositorMismatch { expected, actual } => CoreError::validation(format!(
                "depositor mismatch: expected {expected}, got {actual}"
            )),
            EngineError::AlreadyDeposited(id) => CoreError::conflict(format!("already deposited: {id}")),
            EngineError::AlreadySettled(id) => CoreError::conflict(format!("already settled: {id}")),
            EngineError::NotHeld(id) => CoreError::validation(format!("escrow not held: {id}")),
            EngineError::InsufficientFunds { needed, available } => CoreError::validation(format!(
                "insufficient funds: needed {needed}, have {available}"
            )),
            EngineError::AlreadyRegistered(h) => CoreError::conflict(format!("already registered: {h}")),
            EngineError::NotRegistered(h) => CoreError::not_found(format!("not registered: {h}")),
            EngineError::Escrow(msg) | EngineError::Identity(msg) | EngineError::Store(msg) => {
                CoreError::internal(msg)
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
