//! Error replacement: `on_error_map`, `on_error_resume`, `on_error_return`.

use super::dispatch::{ErrorDispatch, ErrorMapper, Fallback};
use super::{Gate, Upstream};
use crate::error::{guard_callback, ErrorClass, StreamError};
use crate::publisher::{Flux, Publisher, Source};
use crate::signal::Event;
use std::sync::Arc;
use std::task::Poll;
use tracing::debug;

// --- on_error_map ---

struct MapErrorPublisher<T> {
    upstream: Flux<T>,
    dispatch: Arc<ErrorDispatch<ErrorMapper>>,
}

impl<T: Send + 'static> Publisher<T> for MapErrorPublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(MapErrorSource {
            upstream: Upstream::open(&self.upstream),
            dispatch: Arc::clone(&self.dispatch),
            gate: Gate::default(),
        })
    }
}

struct MapErrorSource<T> {
    upstream: Upstream<T>,
    dispatch: Arc<ErrorDispatch<ErrorMapper>>,
    gate: Gate,
}

impl<T: Send + 'static> Source<T> for MapErrorSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        if self.gate.is_closed() {
            return Poll::Pending;
        }
        let event = match self.upstream.poll_terminal() {
            Poll::Ready(Event::Error(error)) => match self.dispatch.select(&error) {
                Some(mapper) => {
                    let from = error.class;
                    let mapped = guard_callback("on_error_map", || mapper.apply(error))
                        .unwrap_or_else(|failure| failure);
                    debug!(from = %from, to = %mapped.class, "error mapped");
                    Event::Error(mapped)
                }
                None => Event::Error(error),
            },
            Poll::Ready(event) => event,
            Poll::Pending => return Poll::Pending,
        };
        self.gate.pass(event)
    }

    fn cancel(&mut self) {
        self.upstream.cancel();
    }
}

// --- on_error_resume ---

struct ResumePublisher<T> {
    upstream: Flux<T>,
    dispatch: Arc<ErrorDispatch<Fallback<T>>>,
}

impl<T: Send + 'static> Publisher<T> for ResumePublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(ResumeSource {
            stage: ResumeStage::Primary(Upstream::open(&self.upstream)),
            dispatch: Arc::clone(&self.dispatch),
        })
    }
}

enum ResumeStage<T> {
    Primary(Upstream<T>),
    Fallback(Upstream<T>),
    Done,
}

struct ResumeSource<T> {
    stage: ResumeStage<T>,
    dispatch: Arc<ErrorDispatch<Fallback<T>>>,
}

impl<T: Send + 'static> ResumeSource<T> {
    fn finish(&mut self, event: Event<T>) -> Poll<Event<T>> {
        if event.is_terminal() {
            self.stage = ResumeStage::Done;
        }
        Poll::Ready(event)
    }
}

impl<T: Send + 'static> Source<T> for ResumeSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        let event = match &mut self.stage {
            ResumeStage::Done => return Poll::Pending,
            ResumeStage::Fallback(fallback) => match fallback.poll_terminal() {
                Poll::Ready(event) => event,
                Poll::Pending => return Poll::Pending,
            },
            ResumeStage::Primary(primary) => match primary.poll_terminal() {
                Poll::Ready(Event::Error(error)) => {
                    let Some(fallback) = self.dispatch.select(&error).cloned() else {
                        return self.finish(Event::Error(error));
                    };
                    debug!(class = %error.class, "resuming with fallback publisher");
                    match guard_callback("on_error_resume", || fallback.apply(error)) {
                        Ok(flux) => {
                            self.stage = ResumeStage::Fallback(Upstream::open(&flux));
                            return self.poll_next();
                        }
                        Err(failure) => Event::Error(failure),
                    }
                }
                Poll::Ready(event) => event,
                Poll::Pending => return Poll::Pending,
            },
        };
        self.finish(event)
    }

    fn cancel(&mut self) {
        match &mut self.stage {
            ResumeStage::Primary(upstream) | ResumeStage::Fallback(upstream) => upstream.cancel(),
            ResumeStage::Done => {}
        }
        self.stage = ResumeStage::Done;
    }
}

// --- on_error_return ---

struct ReturnPublisher<T> {
    upstream: Flux<T>,
    filter: Option<ErrorClass>,
    value: T,
}

impl<T: Clone + Send + Sync + 'static> Publisher<T> for ReturnPublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(ReturnSource {
            stage: ReturnStage::Primary(Upstream::open(&self.upstream)),
            filter: self.filter,
            value: Some(self.value.clone()),
        })
    }
}

enum ReturnStage<T> {
    Primary(Upstream<T>),
    Completing,
    Done,
}

struct ReturnSource<T> {
    stage: ReturnStage<T>,
    filter: Option<ErrorClass>,
    value: Option<T>,
}

impl<T: Send + 'static> Source<T> for ReturnSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        match &mut self.stage {
            ReturnStage::Done => Poll::Pending,
            ReturnStage::Completing => {
                self.stage = ReturnStage::Done;
                Poll::Ready(Event::Complete)
            }
            ReturnStage::Primary(primary) => match primary.poll_terminal() {
                Poll::Ready(Event::Error(error))
                    if self.filter.map_or(true, |class| error.is_a(&class)) =>
                {
                    debug!(class = %error.class, "error replaced by fallback value");
                    match self.value.take() {
                        Some(value) => {
                            self.stage = ReturnStage::Completing;
                            Poll::Ready(Event::Next(value))
                        }
                        None => {
                            self.stage = ReturnStage::Done;
                            Poll::Ready(Event::Complete)
                        }
                    }
                }
                Poll::Ready(event) => {
                    if event.is_terminal() {
                        self.stage = ReturnStage::Done;
                    }
                    Poll::Ready(event)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn cancel(&mut self) {
        if let ReturnStage::Primary(upstream) = &mut self.stage {
            upstream.cancel();
        }
        self.stage = ReturnStage::Done;
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Transform any error with `mapper`.
    pub fn on_error_map<F>(self, mapper: F) -> Self
    where
        F: Fn(StreamError) -> StreamError + Send + Sync + 'static,
    {
        self.on_error_map_with(ErrorDispatch::single(None, ErrorMapper::new(mapper)))
    }

    /// Transform errors of `class` (or a subclass) with `mapper`; other
    /// errors pass through.
    pub fn on_error_map_for<F>(self, class: ErrorClass, mapper: F) -> Self
    where
        F: Fn(StreamError) -> StreamError + Send + Sync + 'static,
    {
        self.on_error_map_with(ErrorDispatch::single(Some(class), ErrorMapper::new(mapper)))
    }

    /// Transform errors with the most specific matching entry of `dispatch`.
    pub fn on_error_map_with(self, dispatch: ErrorDispatch<ErrorMapper>) -> Self {
        Self::from_publisher(MapErrorPublisher {
            upstream: self,
            dispatch: Arc::new(dispatch),
        })
    }

    /// On any error, continue with the publisher returned by `fallback`.
    pub fn on_error_resume<F>(self, fallback: F) -> Self
    where
        F: Fn(StreamError) -> Flux<T> + Send + Sync + 'static,
    {
        self.on_error_resume_with(ErrorDispatch::single(None, Fallback::new(fallback)))
    }

    /// On errors of `class` (or a subclass), continue with the publisher
    /// returned by `fallback`.
    pub fn on_error_resume_for<F>(self, class: ErrorClass, fallback: F) -> Self
    where
        F: Fn(StreamError) -> Flux<T> + Send + Sync + 'static,
    {
        self.on_error_resume_with(ErrorDispatch::single(Some(class), Fallback::new(fallback)))
    }

    /// On error, continue with the most specific matching fallback.
    ///
    /// The fallback's own signals, including its terminal, replace the
    /// error. A failing fallback is not resumed again by the same stage.
    pub fn on_error_resume_with(self, dispatch: ErrorDispatch<Fallback<T>>) -> Self {
        Self::from_publisher(ResumePublisher {
            upstream: self,
            dispatch: Arc::new(dispatch),
        })
    }

    /// On any error, emit `value` and complete.
    pub fn on_error_return(self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_publisher(ReturnPublisher {
            upstream: self,
            filter: None,
            value,
        })
    }

    /// On errors of `class` (or a subclass), emit `value` and complete.
    pub fn on_error_return_for(self, class: ErrorClass, value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_publisher(ReturnPublisher {
            upstream: self,
            filter: Some(class),
            value,
        })
    }
}
