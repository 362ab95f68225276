//! Error types for streams and for the step verifier.

use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tracing::warn;

/// Category tag of a stream error.
///
/// Classes form a single-parent hierarchy so that a handler registered for
/// a broad class also catches its descendants. New classes are declared in
/// `const` context:
///
/// ```
/// use reflux::ErrorClass;
///
/// const TIMEOUT: ErrorClass = ErrorClass::new("Timeout", Some(&ErrorClass::RUNTIME_FAILURE));
/// assert!(TIMEOUT.is_a(&ErrorClass::RUNTIME_FAILURE));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ErrorClass {
    name: &'static str,
    #[serde(skip)]
    parent: Option<&'static ErrorClass>,
}

impl ErrorClass {
    pub const RUNTIME_FAILURE: ErrorClass = ErrorClass::new("RuntimeFailure", None);
    pub const ILLEGAL_ARGUMENT: ErrorClass =
        ErrorClass::new("IllegalArgument", Some(&ErrorClass::RUNTIME_FAILURE));
    pub const ILLEGAL_STATE: ErrorClass =
        ErrorClass::new("IllegalState", Some(&ErrorClass::RUNTIME_FAILURE));
    pub const FIELD_MISSING: ErrorClass = ErrorClass::new("FieldMissing", None);
    /// A user callback panicked while handling a signal.
    pub const CALLBACK_FAILURE: ErrorClass =
        ErrorClass::new("CallbackFailure", Some(&ErrorClass::RUNTIME_FAILURE));
    /// A bounded consumer fell behind and was dropped.
    pub const OVERFLOW: ErrorClass =
        ErrorClass::new("Overflow", Some(&ErrorClass::ILLEGAL_STATE));

    pub const fn new(name: &'static str, parent: Option<&'static ErrorClass>) -> Self {
        Self { name, parent }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ErrorClass> {
        self.parent
    }

    /// Number of parent hops from `self` up to `ancestor`, if `self` is-a `ancestor`.
    pub fn distance_to(&self, ancestor: &ErrorClass) -> Option<usize> {
        let mut current = Some(self);
        let mut hops = 0;
        while let Some(class) = current {
            if class == ancestor {
                return Some(hops);
            }
            current = class.parent;
            hops += 1;
        }
        None
    }

    /// Whether `self` equals `ancestor` or descends from it.
    pub fn is_a(&self, ancestor: &ErrorClass) -> bool {
        self.distance_to(ancestor).is_some()
    }
}

impl fmt::Debug for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorClass({})", self.name)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The cause carried by an error signal.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[error("{class}: {message}")]
pub struct StreamError {
    pub class: ErrorClass,
    pub message: String,
}

impl StreamError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// An error of the given class with an empty message.
    pub fn of(class: ErrorClass) -> Self {
        Self::new(class, "")
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::RUNTIME_FAILURE, message)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::ILLEGAL_ARGUMENT, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::ILLEGAL_STATE, message)
    }

    pub fn field_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::FIELD_MISSING, message)
    }

    pub fn is_a(&self, class: &ErrorClass) -> bool {
        self.class.is_a(class)
    }
}

/// Run a user callback, turning a panic into a `CallbackFailure` error.
pub(crate) fn guard_callback<R>(
    what: &'static str,
    f: impl FnOnce() -> R,
) -> std::result::Result<R, StreamError> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let panic_message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        warn!(callback = what, panic_message = %panic_message, "callback panicked");

        StreamError::new(
            ErrorClass::CALLBACK_FAILURE,
            format!("{} panicked: {}", what, panic_message),
        )
    })
}

/// Failure reported by the step verifier when a stream diverges from its script.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("expectation #{step} failed: expected {expected}, got {actual} (observed: [{history}])")]
    Mismatch {
        step: usize,
        expected: String,
        actual: String,
        history: String,
    },

    #[error("expectation #{step} failed: expected {expected}, but the stream stalled after {rounds} idle rounds (observed: [{history}])")]
    Stalled {
        step: usize,
        expected: String,
        rounds: usize,
        history: String,
    },

    #[error("unexpected signal after the script ended: {0}")]
    Unexpected(String),

    #[error("script is incomplete: no terminal expectation or cancel after step #{0}")]
    IncompleteScript(usize),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for VerifyError {
    fn from(e: serde_json::Error) -> Self {
        VerifyError::Serialization(e.to_string())
    }
}

/// Result type for verification.
pub type Result<T> = std::result::Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: ErrorClass = ErrorClass::new("Timeout", Some(&ErrorClass::ILLEGAL_STATE));

    #[test]
    fn test_builtin_hierarchy() {
        assert!(ErrorClass::ILLEGAL_ARGUMENT.is_a(&ErrorClass::RUNTIME_FAILURE));
        assert!(ErrorClass::ILLEGAL_STATE.is_a(&ErrorClass::RUNTIME_FAILURE));
        assert!(!ErrorClass::FIELD_MISSING.is_a(&ErrorClass::RUNTIME_FAILURE));
        assert!(!ErrorClass::RUNTIME_FAILURE.is_a(&ErrorClass::ILLEGAL_ARGUMENT));
    }

    #[test]
    fn test_custom_class_distance() {
        assert_eq!(TIMEOUT.distance_to(&TIMEOUT), Some(0));
        assert_eq!(TIMEOUT.distance_to(&ErrorClass::ILLEGAL_STATE), Some(1));
        assert_eq!(TIMEOUT.distance_to(&ErrorClass::RUNTIME_FAILURE), Some(2));
        assert_eq!(TIMEOUT.distance_to(&ErrorClass::ILLEGAL_ARGUMENT), None);
    }

    #[test]
    fn test_stream_error_display_and_json() {
        let err = StreamError::illegal_argument("bad input");
        assert_eq!(err.to_string(), "IllegalArgument: bad input");

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["class"]["name"], "IllegalArgument");
        assert_eq!(json["message"], "bad input");
    }
}
