//! Error types for the lelink library
//!
//! This module defines the error type shared by all Link Layer components,
//! the coarse error-kind taxonomy used by callers to pick a retry policy,
//! and the mapping to controller status codes.

use thiserror::Error;

// Controller status codes reported alongside events and in logs.
pub const STATUS_SUCCESS: u8 = 0x00;
pub const STATUS_UNKNOWN_CONN_ID: u8 = 0x02;
pub const STATUS_PIN_OR_KEY_MISSING: u8 = 0x06;
pub const STATUS_MEM_CAPACITY_EXCEEDED: u8 = 0x07;
pub const STATUS_CONN_LIMIT_EXCEEDED: u8 = 0x09;
pub const STATUS_COMMAND_DISALLOWED: u8 = 0x0C;
pub const STATUS_UNSUPPORTED_FEATURE: u8 = 0x11;
pub const STATUS_INVALID_PARAMETER: u8 = 0x12;
pub const STATUS_OPERATION_CANCELLED: u8 = 0x44;
pub const STATUS_INSTANT_PASSED: u8 = 0x28;
pub const STATUS_PARAM_OUT_OF_RANGE: u8 = 0x30;
pub const STATUS_CONTROLLER_BUSY: u8 = 0x3A;

/// Errors returned by Link Layer commands and callbacks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlError {
    #[error("parameter out of range: {0}")]
    ParameterOutOfRange(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("illegal parameter combination: {0}")]
    IllegalParamCombination(String),

    #[error("connection limit reached")]
    ConnectionLimit,

    #[error("white list full")]
    WhiteListFull,

    #[error("resolving list full")]
    ResolvingListFull,

    #[error("radio busy")]
    RadioBusy,

    #[error("unknown or inactive connection handle {0}")]
    InactiveConnection(u16),

    #[error("control procedure already active on connection {0}")]
    ProcedureAlreadyActive(u16),

    #[error("command disallowed: {0}")]
    CommandDisallowed(String),

    #[error("procedure instant already passed")]
    InstantPassed,

    #[error("entry already exists")]
    AlreadyExists,

    #[error("entry not found")]
    NotFound,

    #[error("pin or key missing")]
    KeyMissing,

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("key generation already pending")]
    KeyGenPending,
}

/// Result type for Link Layer operations
pub type LlResult<T> = Result<T, LlError>;

/// Coarse failure classification, one per distinguishable retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single field is out of bounds
    ParameterRange,
    /// Fields individually valid but jointly inconsistent
    ParameterCombination,
    /// Pool, table, or radio slot exhausted (retryable)
    ResourceExhausted,
    /// Operation not valid in the current connection/procedure state
    StateConflict,
    /// Lookup miss in a bounded table
    NotFound,
    /// Peer or local controller lacks a required capability
    FeatureUnsupported,
    /// An asynchronous key-generation job is already in flight
    CryptoPending,
}

impl LlError {
    /// Classify this error for retry-policy purposes
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlError::ParameterOutOfRange(_) | LlError::InvalidParameter(_) => {
                ErrorKind::ParameterRange
            }
            LlError::IllegalParamCombination(_) => ErrorKind::ParameterCombination,
            LlError::ConnectionLimit
            | LlError::WhiteListFull
            | LlError::ResolvingListFull
            | LlError::RadioBusy => ErrorKind::ResourceExhausted,
            LlError::InactiveConnection(_)
            | LlError::ProcedureAlreadyActive(_)
            | LlError::CommandDisallowed(_)
            | LlError::InstantPassed
            | LlError::AlreadyExists => ErrorKind::StateConflict,
            LlError::NotFound | LlError::KeyMissing => ErrorKind::NotFound,
            LlError::UnsupportedFeature(_) => ErrorKind::FeatureUnsupported,
            LlError::KeyGenPending => ErrorKind::CryptoPending,
        }
    }

    /// Controller status code carried in events and host-visible results
    pub fn status_code(&self) -> u8 {
        match self {
            LlError::ParameterOutOfRange(_) => STATUS_PARAM_OUT_OF_RANGE,
            LlError::InvalidParameter(_) => STATUS_INVALID_PARAMETER,
            LlError::IllegalParamCombination(_) => STATUS_INVALID_PARAMETER,
            LlError::ConnectionLimit => STATUS_CONN_LIMIT_EXCEEDED,
            LlError::WhiteListFull | LlError::ResolvingListFull => STATUS_MEM_CAPACITY_EXCEEDED,
            LlError::RadioBusy => STATUS_CONTROLLER_BUSY,
            LlError::InactiveConnection(_) => STATUS_UNKNOWN_CONN_ID,
            LlError::ProcedureAlreadyActive(_) => STATUS_CONTROLLER_BUSY,
            LlError::CommandDisallowed(_) => STATUS_COMMAND_DISALLOWED,
            LlError::InstantPassed => STATUS_INSTANT_PASSED,
            LlError::AlreadyExists => STATUS_INVALID_PARAMETER,
            LlError::NotFound => STATUS_INVALID_PARAMETER,
            LlError::KeyMissing => STATUS_PIN_OR_KEY_MISSING,
            LlError::UnsupportedFeature(_) => STATUS_UNSUPPORTED_FEATURE,
            LlError::KeyGenPending => STATUS_CONTROLLER_BUSY,
        }
    }

    /// Whether a caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ResourceExhausted
    }
}
