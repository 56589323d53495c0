use ulid::Ulid;

use crate::model::HoldStatus;

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    /// Configuration-time failure: window start >= end, overlapping windows
    /// within a day, or unusable session settings.
    InvalidWindow(&'static str),
    /// Chosen slot is no longer free. Recoverable at submit (refresh the
    /// slot list); fatal for the hold at confirm.
    SlotUnavailable,
    /// Hold TTL elapsed before payment confirmation.
    HoldExpired,
    /// Illegal hold state-machine transition.
    InvalidTransition { from: HoldStatus, to: HoldStatus },
    /// Missing or inconsistent client/consultant/date/time on submit.
    ValidationError(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable snake_case kind for the wire protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidWindow(_) => "invalid_window",
            EngineError::SlotUnavailable => "slot_unavailable",
            EngineError::HoldExpired => "hold_expired",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::ValidationError(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidWindow(msg) => write!(f, "invalid window: {msg}"),
            EngineError::SlotUnavailable => write!(f, "slot no longer available"),
            EngineError::HoldExpired => write!(f, "hold expired before confirmation"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid hold transition: {from:?} -> {to:?}")
            }
            EngineError::ValidationError(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
