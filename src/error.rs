use thiserror::Error;

use crate::cursor::CursorId;
use crate::operation::SiteId;

/// Errors raised by the concurrency-control core.
///
/// Everything except `InvalidArgument` is fatal for the affected document:
/// the session has to be torn down and the site has to rejoin.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OtError {
    #[error("Position {position} out of range for model of size {size}")]
    PositionOutOfRange { position: usize, size: usize },

    #[error("No transformation for remote {remote} against local {local}")]
    UnsupportedPair { remote: String, local: String },

    #[error("Operation carries no metadata")]
    MissingMetadata,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Entity type {type_tag} has no field {field}")]
    UnknownField { type_tag: String, field: String },

    #[error("Entity type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("State has {found} components, expected {expected}")]
    StateMismatch { expected: usize, found: usize },

    #[error("Cursor {0} is already registered")]
    CursorAlreadyRegistered(CursorId),

    #[error("Cursor {0} is not registered")]
    UnknownCursor(CursorId),

    #[error("Replica has not received its initial fill")]
    NotJoined,

    #[error("Replica has already been filled")]
    AlreadyJoined,

    #[error("Unknown site {0}")]
    UnknownSite(SiteId),

    #[error("Site {0} is already registered")]
    SiteAlreadyRegistered(SiteId),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Document lock poisoned: {0}")]
    LockPoisoned(String),
}
