//! Error types for ferry-reflect

use thiserror::Error;

/// Errors raised by host-side operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    /// A value did not have the expected type
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A field, property, method or constructor does not exist
    #[error("{ty} has no member '{member}'")]
    MissingMember { ty: String, member: String },

    /// A type signature could not be parsed
    #[error("invalid type signature '{text}': {reason}")]
    InvalidSignature { text: String, reason: String },

    /// A type name is not registered in the universe
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// A host member body failed
    #[error("invocation of {member} failed: {message}")]
    Invocation { member: String, message: String },

    /// A future was cancelled before it completed
    #[error("operation was cancelled")]
    Cancelled,

    /// A collection index was out of bounds
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The operation is not supported by this object
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A script exception surfaced through a host call
    #[error("script error: {message}")]
    Script { message: String, stack: Vec<String> },
}

impl HostError {
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn missing_member(ty: impl Into<String>, member: impl Into<String>) -> Self {
        Self::MissingMember {
            ty: ty.into(),
            member: member.into(),
        }
    }

    pub fn invocation(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            member: member.into(),
            message: message.into(),
        }
    }

    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported(what.into())
    }

    pub fn script(message: impl Into<String>, stack: Vec<String>) -> Self {
        Self::Script {
            message: message.into(),
            stack,
        }
    }
}

/// Result type for host operations
pub type HostResult<T> = Result<T, HostError>;
