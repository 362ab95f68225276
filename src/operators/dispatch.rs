//! Class-keyed handler tables for error operators.

use crate::error::{ErrorClass, StreamError};
use crate::publisher::Flux;
use std::sync::Arc;

/// Maps one error to another.
#[derive(Clone)]
pub struct ErrorMapper(Arc<dyn Fn(StreamError) -> StreamError + Send + Sync>);

impl ErrorMapper {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(StreamError) -> StreamError + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, error: StreamError) -> StreamError {
        (self.0)(error)
    }
}

/// Produces the publisher to continue with after an error.
pub struct Fallback<T>(Arc<dyn Fn(StreamError) -> Flux<T> + Send + Sync>);

impl<T> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Fallback<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(StreamError) -> Flux<T> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, error: StreamError) -> Flux<T> {
        (self.0)(error)
    }
}

/// Ordered list of `(class filter, handler)` pairs.
///
/// `select` picks the handler whose class is the closest ancestor of (or
/// equal to) the error's class; among equally close handlers the one
/// registered first wins. A catch-all handler matches everything but loses
/// to any class-specific match.
///
/// ```
/// use reflux::{ErrorClass, ErrorDispatch, StreamError};
///
/// let dispatch = ErrorDispatch::mappers()
///     .on(ErrorClass::RUNTIME_FAILURE, |_| StreamError::illegal_state("broad"))
///     .on(ErrorClass::ILLEGAL_ARGUMENT, |_| StreamError::field_missing("narrow"));
///
/// let mapper = dispatch.select(&StreamError::illegal_argument("x")).unwrap();
/// assert_eq!(mapper.apply(StreamError::illegal_argument("x")).message, "narrow");
/// ```
pub struct ErrorDispatch<H> {
    handlers: Vec<(Option<ErrorClass>, H)>,
}

impl<H: Clone> Clone for ErrorDispatch<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<H> ErrorDispatch<H> {
    fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub(crate) fn single(class: Option<ErrorClass>, handler: H) -> Self {
        Self {
            handlers: vec![(class, handler)],
        }
    }

    fn push(mut self, class: Option<ErrorClass>, handler: H) -> Self {
        self.handlers.push((class, handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Most specific handler for `error`, if any matches.
    pub fn select(&self, error: &StreamError) -> Option<&H> {
        let mut best: Option<(usize, &H)> = None;
        for (class, handler) in &self.handlers {
            let distance = match class {
                Some(class) => match error.class.distance_to(class) {
                    Some(distance) => distance,
                    None => continue,
                },
                None => usize::MAX,
            };
            if best.map_or(true, |(current, _)| distance < current) {
                best = Some((distance, handler));
            }
        }
        best.map(|(_, handler)| handler)
    }
}

impl ErrorDispatch<ErrorMapper> {
    /// An empty table of error mappers.
    pub fn mappers() -> Self {
        Self::empty()
    }

    /// Map errors of `class` (or a subclass).
    pub fn on<F>(self, class: ErrorClass, f: F) -> Self
    where
        F: Fn(StreamError) -> StreamError + Send + Sync + 'static,
    {
        self.push(Some(class), ErrorMapper::new(f))
    }

    /// Map any error not claimed by a class-specific entry.
    pub fn otherwise<F>(self, f: F) -> Self
    where
        F: Fn(StreamError) -> StreamError + Send + Sync + 'static,
    {
        self.push(None, ErrorMapper::new(f))
    }
}

impl<T> ErrorDispatch<Fallback<T>> {
    /// An empty table of fallback publishers.
    pub fn fallbacks() -> Self {
        Self::empty()
    }

    /// Resume with `f(error)` for errors of `class` (or a subclass).
    pub fn on<F>(self, class: ErrorClass, f: F) -> Self
    where
        F: Fn(StreamError) -> Flux<T> + Send + Sync + 'static,
    {
        self.push(Some(class), Fallback::new(f))
    }

    /// Resume with `f(error)` for any error not claimed by a class-specific entry.
    pub fn otherwise<F>(self, f: F) -> Self
    where
        F: Fn(StreamError) -> Flux<T> + Send + Sync + 'static,
    {
        self.push(None, Fallback::new(f))
    }
}
