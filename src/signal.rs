//! Signal vocabulary shared by publishers, operators and subscribers.

use crate::error::StreamError;
use serde::Serialize;
use std::fmt;

/// The element that caused a per-element failure, kept for diagnostics.
pub type FailedElement = Box<dyn fmt::Debug + Send>;

/// A signal as observed by a subscriber.
///
/// A well-formed stream is zero or more `Next` followed by at most one
/// terminal (`Error` or `Complete`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", content = "value", rename_all = "snake_case")]
pub enum Signal<T> {
    Next(T),
    Error(StreamError),
    Complete,
}

impl<T> Signal<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Next(_))
    }
}

impl<T: fmt::Debug> fmt::Display for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Next(value) => write!(f, "onNext({:?})", value),
            Signal::Error(error) => write!(f, "onError({})", error),
            Signal::Complete => f.write_str("onComplete()"),
        }
    }
}

/// A signal travelling between two stages of a pipeline.
///
/// Besides the public signals, stages may report that a single element
/// failed while the producer stays usable. Only `on_error_continue`
/// placed directly below the producer recovers from that; every other
/// error-handling stage and the subscription itself escalate it into a
/// terminal `Error`.
pub enum Event<T> {
    Next(T),
    ElementFailure {
        error: StreamError,
        element: Option<FailedElement>,
    },
    Error(StreamError),
    Complete,
}

impl<T> Event<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Error(_) | Event::Complete)
    }

    /// Turn a per-element failure into a terminal error. The caller is
    /// responsible for cancelling the producer.
    pub fn escalate(self) -> Self {
        match self {
            Event::ElementFailure { error, .. } => Event::Error(error),
            other => other,
        }
    }

    /// Converts a terminal or value event into a public signal.
    /// Per-element failures are escalated.
    pub fn into_signal(self) -> Signal<T> {
        match self {
            Event::Next(value) => Signal::Next(value),
            Event::ElementFailure { error, .. } | Event::Error(error) => Signal::Error(error),
            Event::Complete => Signal::Complete,
        }
    }
}

impl<T> From<Signal<T>> for Event<T> {
    fn from(signal: Signal<T>) -> Self {
        match signal {
            Signal::Next(value) => Event::Next(value),
            Signal::Error(error) => Event::Error(error),
            Signal::Complete => Event::Complete,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Next(value) => f.debug_tuple("Next").field(value).finish(),
            Event::ElementFailure { error, element } => f
                .debug_struct("ElementFailure")
                .field("error", error)
                .field("element", element)
                .finish(),
            Event::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Event::Complete => f.write_str("Complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalate_element_failure() {
        let event: Event<i32> = Event::ElementFailure {
            error: StreamError::runtime("boom"),
            element: Some(Box::new(7)),
        };
        assert!(!event.is_terminal());

        let escalated = event.escalate();
        assert!(escalated.is_terminal());
        assert_eq!(escalated.into_signal(), Signal::Error(StreamError::runtime("boom")));
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::Next(3).to_string(), "onNext(3)");
        assert_eq!(Signal::<i32>::Complete.to_string(), "onComplete()");
        assert_eq!(
            Signal::<i32>::Error(StreamError::illegal_state("x")).to_string(),
            "onError(IllegalState: x)"
        );
    }

    #[test]
    fn test_signal_json_shape() {
        let json = serde_json::to_value(Signal::Next(5)).unwrap();
        assert_eq!(json["signal"], "next");
        assert_eq!(json["value"], 5);

        let json = serde_json::to_value(Signal::<i32>::Complete).unwrap();
        assert_eq!(json["signal"], "complete");
    }
}
