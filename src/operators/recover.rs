//! Error observation and suppression: `do_on_error`, `on_error_continue`,
//! `on_error_stop`, `on_error_complete`.

use super::{Gate, Upstream};
use crate::error::{guard_callback, ErrorClass, StreamError};
use crate::publisher::{Flux, Publisher, Source};
use crate::signal::Event;
use std::fmt;
use std::sync::Arc;
use std::task::Poll;
use tracing::debug;

type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;
type ContinueHandler = Arc<dyn Fn(&StreamError, Option<&dyn fmt::Debug>) + Send + Sync>;

// --- do_on_error ---

struct DoOnErrorPublisher<T> {
    upstream: Flux<T>,
    callback: ErrorCallback,
}

impl<T: Send + 'static> Publisher<T> for DoOnErrorPublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(DoOnErrorSource {
            upstream: Upstream::open(&self.upstream),
            callback: Arc::clone(&self.callback),
            gate: Gate::default(),
        })
    }
}

struct DoOnErrorSource<T> {
    upstream: Upstream<T>,
    callback: ErrorCallback,
    gate: Gate,
}

impl<T: Send + 'static> DoOnErrorSource<T> {
    /// Run the callback; a panic replaces the signal with a terminal error.
    fn observe(&mut self, error: &StreamError) -> Result<(), StreamError> {
        let callback = Arc::clone(&self.callback);
        guard_callback("do_on_error", || callback(error)).map_err(|failure| {
            self.upstream.cancel();
            StreamError::new(
                failure.class,
                format!("{} (while handling {})", failure.message, error),
            )
        })
    }
}

impl<T: Send + 'static> Source<T> for DoOnErrorSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        if self.gate.is_closed() {
            return Poll::Pending;
        }
        let event = match self.upstream.poll() {
            Poll::Ready(event) => event,
            Poll::Pending => return Poll::Pending,
        };
        let event = match event {
            Event::ElementFailure { error, element } => match self.observe(&error) {
                Ok(()) => Event::ElementFailure { error, element },
                Err(failure) => Event::Error(failure),
            },
            Event::Error(error) => match self.observe(&error) {
                Ok(()) => Event::Error(error),
                Err(failure) => Event::Error(failure),
            },
            other => other,
        };
        self.gate.pass(event)
    }

    fn cancel(&mut self) {
        self.upstream.cancel();
    }
}

// --- on_error_continue ---

struct ContinuePublisher<T> {
    upstream: Flux<T>,
    filter: Option<ErrorClass>,
    handler: ContinueHandler,
}

impl<T: Send + 'static> Publisher<T> for ContinuePublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(ContinueSource {
            upstream: Upstream::open(&self.upstream),
            filter: self.filter,
            handler: Arc::clone(&self.handler),
            gate: Gate::default(),
        })
    }
}

struct ContinueSource<T> {
    upstream: Upstream<T>,
    filter: Option<ErrorClass>,
    handler: ContinueHandler,
    gate: Gate,
}

impl<T: Send + 'static> Source<T> for ContinueSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        if self.gate.is_closed() {
            return Poll::Pending;
        }
        loop {
            let event = match self.upstream.poll() {
                Poll::Ready(event) => event,
                Poll::Pending => return Poll::Pending,
            };
            match event {
                Event::ElementFailure { error, element }
                    if self.filter.map_or(true, |class| error.is_a(&class)) =>
                {
                    debug!(class = %error.class, "dropping failed element and continuing");
                    let handler = Arc::clone(&self.handler);
                    let handled = guard_callback("on_error_continue", || {
                        handler(&error, element.as_deref().map(|e| e as &dyn fmt::Debug))
                    });
                    if let Err(failure) = handled {
                        self.upstream.cancel();
                        return self.gate.pass(Event::Error(failure));
                    }
                }
                other => return self.gate.pass(other),
            }
        }
    }

    fn cancel(&mut self) {
        self.upstream.cancel();
    }
}

// --- on_error_stop ---

struct StopPublisher<T> {
    upstream: Flux<T>,
}

impl<T: Send + 'static> Publisher<T> for StopPublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(StopSource {
            upstream: Upstream::open(&self.upstream),
        })
    }
}

struct StopSource<T> {
    upstream: Upstream<T>,
}

impl<T: Send + 'static> Source<T> for StopSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        self.upstream.poll_terminal()
    }

    fn cancel(&mut self) {
        self.upstream.cancel();
    }
}

// --- on_error_complete ---

struct CompletePublisher<T> {
    upstream: Flux<T>,
    filter: Option<ErrorClass>,
}

impl<T: Send + 'static> Publisher<T> for CompletePublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(CompleteSource {
            upstream: Upstream::open(&self.upstream),
            filter: self.filter,
            gate: Gate::default(),
        })
    }
}

struct CompleteSource<T> {
    upstream: Upstream<T>,
    filter: Option<ErrorClass>,
    gate: Gate,
}

impl<T: Send + 'static> Source<T> for CompleteSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        if self.gate.is_closed() {
            return Poll::Pending;
        }
        let event = match self.upstream.poll_terminal() {
            Poll::Ready(Event::Error(error))
                if self.filter.map_or(true, |class| error.is_a(&class)) =>
            {
                debug!(class = %error.class, "error replaced by completion");
                Event::Complete
            }
            Poll::Ready(event) => event,
            Poll::Pending => return Poll::Pending,
        };
        self.gate.pass(event)
    }

    fn cancel(&mut self) {
        self.upstream.cancel();
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Run `callback` on every error passing through, without altering it.
    ///
    /// A panicking callback turns the signal into a terminal
    /// `CallbackFailure` error.
    pub fn do_on_error<F>(self, callback: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        Self::from_publisher(DoOnErrorPublisher {
            upstream: self,
            callback: Arc::new(callback),
        })
    }

    /// Recover from per-element failures reported by the stage directly
    /// above: call `handler(error, element)`, drop the element and keep
    /// pulling.
    ///
    /// Terminal errors are passed through untouched, so this has no effect
    /// below `on_error_stop` or below any stage that already turned the
    /// failure into a terminal error.
    pub fn on_error_continue<F>(self, handler: F) -> Self
    where
        F: Fn(&StreamError, Option<&dyn fmt::Debug>) + Send + Sync + 'static,
    {
        Self::from_publisher(ContinuePublisher {
            upstream: self,
            filter: None,
            handler: Arc::new(handler),
        })
    }

    /// Like `on_error_continue`, but only for failures of `class`.
    pub fn on_error_continue_for<F>(self, class: ErrorClass, handler: F) -> Self
    where
        F: Fn(&StreamError, Option<&dyn fmt::Debug>) + Send + Sync + 'static,
    {
        Self::from_publisher(ContinuePublisher {
            upstream: self,
            filter: Some(class),
            handler: Arc::new(handler),
        })
    }

    /// Make every error from above terminal again, so an
    /// `on_error_continue` further down cannot recover from it.
    pub fn on_error_stop(self) -> Self {
        Self::from_publisher(StopPublisher { upstream: self })
    }

    /// Replace any error with completion.
    pub fn on_error_complete(self) -> Self {
        Self::from_publisher(CompletePublisher {
            upstream: self,
            filter: None,
        })
    }

    /// Replace errors of `class` (or a subclass) with completion.
    pub fn on_error_complete_for(self, class: ErrorClass) -> Self {
        Self::from_publisher(CompletePublisher {
            upstream: self,
            filter: Some(class),
        })
    }
}
