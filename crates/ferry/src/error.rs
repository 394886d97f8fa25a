//! Error types for the marshalling engine

use ferry_reflect::HostError;
use ferry_script::ScriptError;
use thiserror::Error;

/// Errors raised while building or running conversions
#[derive(Debug, Error)]
pub enum MarshalError {
    /// No conversion strategy exists for the type
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Building a member's conversion failed
    #[error("member {ty}.{member} is unavailable: {cause}")]
    MemberFailure {
        ty: String,
        member: String,
        cause: Box<MarshalError>,
    },

    /// No overload accepts the arguments
    #[error("no overload of {name} accepts ({args})")]
    NoMatchingOverload { name: String, args: String },

    /// More than one overload accepts the arguments equally well
    #[error("ambiguous call to {name}: {}", candidates.join(" | "))]
    AmbiguousOverload {
        name: String,
        candidates: Vec<String>,
    },

    /// A script value was touched from the wrong thread
    #[error("invalid thread access: {0}")]
    InvalidThreadAccess(String),

    /// The realm that owned a value is gone
    #[error("scope closed: {0}")]
    ScopeClosed(String),

    /// A host module could not be located
    #[error("module not found: {name}{}", requester.as_ref().map(|r| format!(" (requested by {})", r)).unwrap_or_default())]
    ModuleNotFound {
        name: String,
        requester: Option<String>,
    },

    /// A value did not fit the expected type
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A module image is malformed
    #[error("invalid module {path}: {reason}")]
    InvalidModule { path: String, reason: String },

    #[error(transparent)]
    Script(ScriptError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MarshalError {
    pub fn unsupported(ty: impl Into<String>) -> Self {
        Self::UnsupportedType(ty.into())
    }

    pub fn member_failure(ty: impl Into<String>, member: impl Into<String>, cause: MarshalError) -> Self {
        Self::MemberFailure {
            ty: ty.into(),
            member: member.into(),
            cause: Box::new(cause),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn invalid_module(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidModule {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Surface this error to a script caller.
    ///
    /// Script exceptions pass through unchanged; everything else becomes a
    /// `TypeError` tagged with `frame`.
    pub fn into_script_error(self, frame: impl Into<String>) -> ScriptError {
        match self {
            MarshalError::Script(err) => err.with_frame(frame),
            MarshalError::ScopeClosed(what) => ScriptError::ScopeClosed(what),
            MarshalError::Host(HostError::Script { message, stack }) => {
                let mut err = ScriptError::type_error(message);
                for line in stack {
                    err = err.with_frame(line);
                }
                err.with_frame(frame)
            }
            other => ScriptError::type_error(other.to_string()).with_frame(frame),
        }
    }
}

impl From<ScriptError> for MarshalError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::InvalidThreadAccess { owner, current } => MarshalError::InvalidThreadAccess(
                format!("owned by {}, accessed from {}", owner, current),
            ),
            ScriptError::ScopeClosed(what) => MarshalError::ScopeClosed(what),
            other => MarshalError::Script(other),
        }
    }
}

impl From<MarshalError> for HostError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::Host(err) => err,
            MarshalError::Script(ScriptError::Exception(exception)) => {
                HostError::script(format!("{}: {}", exception.name, exception.message), exception.stack)
            }
            MarshalError::TypeMismatch { expected, found } => HostError::TypeMismatch { expected, found },
            other => HostError::invocation("marshal", other.to_string()),
        }
    }
}

/// Result type for marshalling operations
pub type MarshalResult<T> = Result<T, MarshalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_errors_map_to_dedicated_variants() {
        let err: MarshalError = ScriptError::scope_closed("realm 1").into();
        assert!(matches!(err, MarshalError::ScopeClosed(_)));

        let err: MarshalError = ScriptError::type_error("bad").into();
        assert!(matches!(err, MarshalError::Script(_)));
    }

    #[test]
    fn test_script_exception_becomes_host_script_error() {
        let err = MarshalError::from(ScriptError::type_error("boom").with_frame("compute"));
        match HostError::from(err) {
            HostError::Script { message, stack } => {
                assert_eq!(message, "TypeError: boom");
                assert_eq!(stack, vec!["compute".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_into_script_error_keeps_host_frames() {
        let err = MarshalError::Host(HostError::script("inner", vec!["Worker.Run".into()]));
        let script = err.into_script_error("Contoso.Job.Start [host]");
        let exception = script.as_exception().unwrap();
        assert_eq!(exception.name, "TypeError");
        assert_eq!(exception.stack, vec!["Worker.Run", "Contoso.Job.Start [host]"]);
    }

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = MarshalError::AmbiguousOverload {
            name: "f".into(),
            candidates: vec!["f(int)".into(), "f(long)".into()],
        };
        assert_eq!(err.to_string(), "ambiguous call to f: f(int) | f(long)");
    }
}
