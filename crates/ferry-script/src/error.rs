//! Error types for ferry-script

use thiserror::Error;

/// Errors raised by script-side operations.
///
/// Unlike script values, errors are `Send` so they can cross the
/// synchronization context back to the thread that requested the work.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// A script exception (`TypeError`, `RangeError`, or a user error)
    #[error("{0}")]
    Exception(Box<Exception>),

    /// A script value or scope was touched from a thread that does not own it
    #[error("invalid thread access: owned by {owner}, accessed from {current}")]
    InvalidThreadAccess { owner: String, current: String },

    /// A value was used after its governing scope ended
    #[error("scope closed: {0}")]
    ScopeClosed(String),

    /// The synchronization context could not deliver or complete a job
    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

/// Script exception payload with a combined call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    /// Error constructor name (`TypeError`, `Error`, ...)
    pub name: String,
    /// Error message
    pub message: String,
    /// Stack frames, innermost first
    pub stack: Vec<String>,
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        for frame in &self.stack {
            write!(f, "\n    at {}", frame)?;
        }
        Ok(())
    }
}

impl ScriptError {
    /// Create an exception with an explicit error name
    pub fn exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exception(Box::new(Exception {
            name: name.into(),
            message: message.into(),
            stack: Vec::new(),
        }))
    }

    /// Create a `TypeError` exception
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::exception("TypeError", message)
    }

    /// Create a `RangeError` exception
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::exception("RangeError", message)
    }

    /// Create a scope-closed error
    pub fn scope_closed(what: impl Into<String>) -> Self {
        Self::ScopeClosed(what.into())
    }

    /// Create an invalid-thread-access error for the current thread
    pub fn invalid_thread(owner: std::thread::ThreadId) -> Self {
        Self::InvalidThreadAccess {
            owner: format!("{:?}", owner),
            current: format!("{:?}", std::thread::current().id()),
        }
    }

    /// Append a stack frame to an exception; other variants are returned as is
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        if let Self::Exception(exception) = &mut self {
            exception.stack.push(frame.into());
        }
        self
    }

    /// Get the exception payload, if this is an exception
    pub fn as_exception(&self) -> Option<&Exception> {
        match self {
            Self::Exception(exception) => Some(exception),
            _ => None,
        }
    }
}

/// Result type for script operations
pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_display_includes_frames() {
        let err = ScriptError::type_error("bad")
            .with_frame("Contoso.Widget.Spin [host]")
            .with_frame("onClick");
        let text = err.to_string();
        assert!(text.starts_with("TypeError: bad"));
        assert!(text.contains("at Contoso.Widget.Spin [host]"));
        assert!(text.contains("at onClick"));
    }

    #[test]
    fn test_with_frame_ignores_non_exceptions() {
        let err = ScriptError::scope_closed("realm").with_frame("ignored");
        assert!(matches!(err, ScriptError::ScopeClosed(_)));
    }
}
