//! Operators: stages that wrap one or more upstream publishers.
//!
//! Every operator is a [`Publisher`](crate::Publisher) whose `open` opens
//! its upstream(s) and wraps the resulting sources. Error handling stages
//! come in two kinds:
//!
//! - `on_error_continue` recovers from per-element failures reported by
//!   the stage directly above it and keeps pulling.
//! - `on_error_stop`, `on_error_complete`, `on_error_map`, `on_error_resume`
//!   and `on_error_return` work on terminal errors; a per-element failure
//!   reaching them is escalated (upstream cancelled, failure turned into a
//!   terminal error) before they look at it.
//!
//! Because every stage acts on what its own upstream produced, chaining
//! several handlers means the first matching one wins and later ones only
//! see its output.

mod dispatch;
mod merge;
mod recover;
mod replace;
mod transform;

pub use dispatch::{ErrorDispatch, ErrorMapper, Fallback};

use crate::publisher::{Flux, Source};
use crate::signal::Event;
use std::task::Poll;
use tracing::trace;

/// An upstream source together with its finished flag.
///
/// Once finished (terminal seen or cancelled) it reports `Pending`
/// forever and never touches the source again.
pub(crate) struct Upstream<T> {
    source: Box<dyn Source<T>>,
    finished: bool,
}

impl<T: Send + 'static> Upstream<T> {
    pub(crate) fn open(flux: &Flux<T>) -> Self {
        Self {
            source: flux.open(),
            finished: false,
        }
    }

    pub(crate) fn poll(&mut self) -> Poll<Event<T>> {
        if self.finished {
            return Poll::Pending;
        }
        let polled = self.source.poll_next();
        if let Poll::Ready(event) = &polled {
            if event.is_terminal() {
                self.finished = true;
            }
        }
        polled
    }

    /// Like `poll`, but a per-element failure cancels the upstream and
    /// comes back as a terminal error.
    pub(crate) fn poll_terminal(&mut self) -> Poll<Event<T>> {
        match self.poll() {
            Poll::Ready(event @ Event::ElementFailure { .. }) => {
                self.cancel();
                Poll::Ready(event.escalate())
            }
            other => other,
        }
    }

    pub(crate) fn cancel(&mut self) {
        if !self.finished {
            self.finished = true;
            self.source.cancel();
            trace!("upstream cancelled");
        }
    }
}

/// Tracks whether a stage has emitted its terminal event.
#[derive(Default)]
pub(crate) struct Gate {
    closed: bool,
}

impl Gate {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Record `event` passing through; closes on terminal.
    pub(crate) fn pass<T>(&mut self, event: Event<T>) -> Poll<Event<T>> {
        if event.is_terminal() {
            self.closed = true;
        }
        Poll::Ready(event)
    }
}
