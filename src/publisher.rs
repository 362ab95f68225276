//! Publishers, per-subscription sources, and the `Flux` handle.
//!
//! A [`Publisher`] is an immutable blueprint. Every subscription opens a
//! fresh [`Source`] from it, so re-subscribing replays the sequence from
//! the start. Sources are pulled: a stage asks its upstream for the next
//! [`Event`] and gets either an event or `Pending` when nothing is ready
//! yet.

use crate::error::{guard_callback, StreamError};
use crate::signal::Event;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::Poll;

/// Per-subscription producer state.
pub trait Source<T>: Send {
    /// Pull the next event. Must not produce anything after a terminal event.
    fn poll_next(&mut self) -> Poll<Event<T>>;

    /// Stop producing and release upstream resources. Idempotent.
    fn cancel(&mut self) {}
}

/// A lazy description of a stream.
pub trait Publisher<T>: Send + Sync {
    /// Create the state for one subscription.
    fn open(&self) -> Box<dyn Source<T>>;
}

/// Cheaply cloneable handle to a publisher, carrying the operator API.
pub struct Flux<T> {
    publisher: Arc<dyn Publisher<T>>,
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T> fmt::Debug for Flux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Flux")
    }
}

impl<T: Send + 'static> Flux<T> {
    pub fn from_publisher<P>(publisher: P) -> Self
    where
        P: Publisher<T> + 'static,
    {
        Self {
            publisher: Arc::new(publisher),
        }
    }

    /// Open a new source for this publisher.
    pub fn open(&self) -> Box<dyn Source<T>> {
        self.publisher.open()
    }

    // --- Sources ---

    /// Emit every item of `items`, then complete.
    ///
    /// The iterable is cloned for each subscription.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_publisher(IterPublisher { items })
    }

    /// Emit the given values, then complete.
    pub fn just(values: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_iter(values)
    }

    /// Terminate immediately with `error`.
    pub fn error(error: StreamError) -> Self {
        Self::from_publisher(ErrorPublisher {
            error,
            _marker: PhantomData,
        })
    }

    /// Complete immediately without emitting anything.
    pub fn empty() -> Self {
        Self::from_publisher(EmptyPublisher(PhantomData))
    }

    /// Never emit anything, not even a terminal signal.
    pub fn never() -> Self {
        Self::from_publisher(NeverPublisher(PhantomData))
    }

    /// Emit values produced by a per-subscription state machine.
    ///
    /// `init` builds fresh state for every subscription; `step` is called
    /// once per pull and decides what the stream does next. A panic in
    /// either terminates the stream with a `CallbackFailure` error.
    pub fn generate<S, I, F>(init: I, step: F) -> Self
    where
        S: Send + 'static,
        I: Fn() -> S + Send + Sync + 'static,
        F: Fn(&mut S) -> Emit<T> + Send + Sync + 'static,
    {
        Self::from_publisher(GeneratePublisher {
            init: Arc::new(init),
            step: Arc::new(step),
        })
    }
}

impl Flux<i32> {
    /// Emit `count` consecutive integers starting at `start`.
    ///
    /// A range that would run past `i32::MAX` terminates immediately with
    /// an `IllegalArgument` error.
    pub fn range(start: i32, count: u32) -> Self {
        if count == 0 {
            return Self::empty();
        }
        let last = i32::try_from(count - 1)
            .ok()
            .and_then(|span| start.checked_add(span));
        match last {
            Some(last) => Self::from_iter(start..=last),
            None => Self::error(StreamError::illegal_argument(format!(
                "range of {} values from {} overflows i32",
                count, start
            ))),
        }
    }
}

// --- Iterable ---

struct IterPublisher<I> {
    items: I,
}

impl<T, I> Publisher<T> for IterPublisher<I>
where
    T: Send + 'static,
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
{
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(IterSource {
            iter: Some(self.items.clone().into_iter()),
        })
    }
}

struct IterSource<It> {
    iter: Option<It>,
}

impl<T, It> Source<T> for IterSource<It>
where
    It: Iterator<Item = T> + Send,
{
    fn poll_next(&mut self) -> Poll<Event<T>> {
        let Some(iter) = self.iter.as_mut() else {
            return Poll::Pending;
        };
        match iter.next() {
            Some(value) => Poll::Ready(Event::Next(value)),
            None => {
                self.iter = None;
                Poll::Ready(Event::Complete)
            }
        }
    }

    fn cancel(&mut self) {
        self.iter = None;
    }
}

// --- Error / Empty / Never ---

struct ErrorPublisher<T> {
    error: StreamError,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Publisher<T> for ErrorPublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(OnceSource {
            event: Some(Event::Error(self.error.clone())),
        })
    }
}

struct EmptyPublisher<T>(PhantomData<fn() -> T>);

impl<T: Send + 'static> Publisher<T> for EmptyPublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(OnceSource {
            event: Some(Event::Complete),
        })
    }
}

/// Emits a single terminal event.
struct OnceSource<T> {
    event: Option<Event<T>>,
}

impl<T: Send> Source<T> for OnceSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        match self.event.take() {
            Some(event) => Poll::Ready(event),
            None => Poll::Pending,
        }
    }

    fn cancel(&mut self) {
        self.event = None;
    }
}

struct NeverPublisher<T>(PhantomData<fn() -> T>);

impl<T: Send + 'static> Publisher<T> for NeverPublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(NeverSource)
    }
}

struct NeverSource;

impl<T> Source<T> for NeverSource {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        Poll::Pending
    }
}

// --- Generate ---

/// What a `generate` step wants the stream to do.
#[derive(Debug)]
pub enum Emit<T> {
    /// Emit a value.
    Next(T),
    /// Nothing ready yet; pull again later.
    Pending,
    /// One element failed; the generator can keep going.
    Fail(StreamError),
    /// Terminate with an error.
    Error(StreamError),
    /// Terminate normally.
    Complete,
}

type InitFn<S> = Arc<dyn Fn() -> S + Send + Sync>;
type StepFn<S, T> = Arc<dyn Fn(&mut S) -> Emit<T> + Send + Sync>;

struct GeneratePublisher<S, T> {
    init: InitFn<S>,
    step: StepFn<S, T>,
}

impl<S, T> Publisher<T> for GeneratePublisher<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(GenerateSource {
            init: Arc::clone(&self.init),
            step: Arc::clone(&self.step),
            state: None,
            done: false,
        })
    }
}

struct GenerateSource<S, T> {
    init: InitFn<S>,
    step: StepFn<S, T>,
    state: Option<S>,
    done: bool,
}

impl<S: Send, T: Send> Source<T> for GenerateSource<S, T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        if self.done {
            return Poll::Pending;
        }

        if self.state.is_none() {
            match guard_callback("generate init", || (self.init)()) {
                Ok(state) => self.state = Some(state),
                Err(error) => {
                    self.done = true;
                    return Poll::Ready(Event::Error(error));
                }
            }
        }
        let Some(state) = self.state.as_mut() else {
            return Poll::Pending;
        };

        let step = Arc::clone(&self.step);
        let emit = match guard_callback("generate step", || step(state)) {
            Ok(emit) => emit,
            Err(error) => Emit::Error(error),
        };

        match emit {
            Emit::Next(value) => Poll::Ready(Event::Next(value)),
            Emit::Pending => Poll::Pending,
            Emit::Fail(error) => Poll::Ready(Event::ElementFailure {
                error,
                element: None,
            }),
            Emit::Error(error) => {
                self.done = true;
                self.state = None;
                Poll::Ready(Event::Error(error))
            }
            Emit::Complete => {
                self.done = true;
                self.state = None;
                Poll::Ready(Event::Complete)
            }
        }
    }

    fn cancel(&mut self) {
        self.done = true;
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T>(source: &mut dyn Source<T>) -> Vec<Event<T>> {
        let mut events = Vec::new();
        while let Poll::Ready(event) = source.poll_next() {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[test]
    fn test_iter_source_replays_per_open() {
        let flux = Flux::just(vec![1, 2, 3]);

        for _ in 0..2 {
            let mut source = flux.open();
            let events = drain(source.as_mut());
            assert_eq!(events.len(), 4);
            assert!(matches!(events[0], Event::Next(1)));
            assert!(matches!(events[3], Event::Complete));
            // Nothing after the terminal
            assert!(source.poll_next().is_pending());
        }
    }

    #[test]
    fn test_range() {
        let mut source = Flux::range(5, 3).open();
        let values: Vec<i32> = drain(source.as_mut())
            .into_iter()
            .filter_map(|e| match e {
                Event::Next(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![5, 6, 7]);
    }

    #[test]
    fn test_range_overflow() {
        let mut source = Flux::range(i32::MAX - 1, 3).open();
        match source.poll_next() {
            Poll::Ready(Event::Error(error)) => {
                assert_eq!(error.class, crate::ErrorClass::ILLEGAL_ARGUMENT);
            }
            other => panic!("Expected illegal argument, got {:?}", other),
        }

        let mut source = Flux::range(0, u32::MAX).open();
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Error(_))));

        // Ending exactly at i32::MAX is fine
        let mut source = Flux::range(i32::MAX - 1, 2).open();
        assert_eq!(drain(source.as_mut()).len(), 3);

        let mut source = Flux::range(7, 0).open();
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Complete)));
    }

    #[test]
    fn test_error_and_empty() {
        let mut source = Flux::<i32>::error(StreamError::runtime("x")).open();
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Error(_))));
        assert!(source.poll_next().is_pending());

        let mut source = Flux::<i32>::empty().open();
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Complete)));
    }

    #[test]
    fn test_cancel_stops_iter() {
        let mut source = Flux::just(vec![1, 2, 3]).open();
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Next(1))));
        source.cancel();
        assert!(source.poll_next().is_pending());
    }

    #[test]
    fn test_generate_pending_and_fail() {
        let flux = Flux::generate(
            || 0u32,
            |n| {
                *n += 1;
                match *n {
                    1 => Emit::Next(10),
                    2 => Emit::Pending,
                    3 => Emit::Fail(StreamError::illegal_argument("odd")),
                    4 => Emit::Next(20),
                    _ => Emit::Complete,
                }
            },
        );

        let mut source = flux.open();
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Next(10))));
        assert!(source.poll_next().is_pending());
        assert!(matches!(
            source.poll_next(),
            Poll::Ready(Event::ElementFailure { .. })
        ));
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Next(20))));
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Complete)));
        assert!(source.poll_next().is_pending());
    }

    #[test]
    fn test_generate_panic_becomes_error() {
        let flux: Flux<i32> = Flux::generate(|| (), |_| panic!("generator exploded"));
        let mut source = flux.open();
        match source.poll_next() {
            Poll::Ready(Event::Error(error)) => {
                assert!(error.is_a(&crate::ErrorClass::CALLBACK_FAILURE));
                assert!(error.message.contains("generator exploded"));
            }
            other => panic!("Expected callback failure, got {:?}", other),
        }
    }
}
