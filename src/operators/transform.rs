//! Value stages: `map`, `try_map`, `take`.

use super::{Gate, Upstream};
use crate::error::{guard_callback, StreamError};
use crate::publisher::{Flux, Publisher, Source};
use crate::signal::{Event, FailedElement};
use std::fmt;
use std::sync::Arc;
use std::task::Poll;

type TryMapFn<T, U> = Arc<dyn Fn(T) -> Result<U, StreamError> + Send + Sync>;
type CaptureFn<T> = Arc<dyn Fn(&T) -> FailedElement + Send + Sync>;

// --- map / try_map ---

struct TryMapPublisher<T, U> {
    upstream: Flux<T>,
    f: TryMapFn<T, U>,
    capture: Option<CaptureFn<T>>,
}

impl<T: Send + 'static, U: Send + 'static> Publisher<U> for TryMapPublisher<T, U> {
    fn open(&self) -> Box<dyn Source<U>> {
        Box::new(TryMapSource {
            upstream: Upstream::open(&self.upstream),
            f: Arc::clone(&self.f),
            capture: self.capture.clone(),
            gate: Gate::default(),
        })
    }
}

struct TryMapSource<T, U> {
    upstream: Upstream<T>,
    f: TryMapFn<T, U>,
    /// Snapshots the input so a failure can report it.
    capture: Option<CaptureFn<T>>,
    gate: Gate,
}

impl<T: Send + 'static, U: Send + 'static> Source<U> for TryMapSource<T, U> {
    fn poll_next(&mut self) -> Poll<Event<U>> {
        if self.gate.is_closed() {
            return Poll::Pending;
        }
        let event = match self.upstream.poll() {
            Poll::Ready(Event::Next(value)) => {
                let element = self.capture.as_ref().map(|capture| capture(&value));
                let f = Arc::clone(&self.f);
                match guard_callback("map", || f(value)) {
                    Ok(Ok(mapped)) => Event::Next(mapped),
                    Ok(Err(error)) => Event::ElementFailure { error, element },
                    Err(failure) => {
                        self.upstream.cancel();
                        Event::Error(failure)
                    }
                }
            }
            Poll::Ready(Event::ElementFailure { error, element }) => {
                Event::ElementFailure { error, element }
            }
            Poll::Ready(Event::Error(error)) => Event::Error(error),
            Poll::Ready(Event::Complete) => Event::Complete,
            Poll::Pending => return Poll::Pending,
        };
        self.gate.pass(event)
    }

    fn cancel(&mut self) {
        self.upstream.cancel();
    }
}

// --- take ---

struct TakePublisher<T> {
    upstream: Flux<T>,
    limit: usize,
}

impl<T: Send + 'static> Publisher<T> for TakePublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        Box::new(TakeSource {
            upstream: Upstream::open(&self.upstream),
            remaining: self.limit,
            gate: Gate::default(),
        })
    }
}

struct TakeSource<T> {
    upstream: Upstream<T>,
    remaining: usize,
    gate: Gate,
}

impl<T: Send + 'static> Source<T> for TakeSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        if self.gate.is_closed() {
            return Poll::Pending;
        }
        if self.remaining == 0 {
            self.upstream.cancel();
            return self.gate.pass(Event::Complete);
        }
        match self.upstream.poll() {
            Poll::Ready(Event::Next(value)) => {
                self.remaining -= 1;
                Poll::Ready(Event::Next(value))
            }
            Poll::Ready(event) => self.gate.pass(event),
            Poll::Pending => Poll::Pending,
        }
    }

    fn cancel(&mut self) {
        self.upstream.cancel();
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Transform every value with `f`.
    ///
    /// A panic in `f` ends the stream with a `CallbackFailure` error.
    pub fn map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Flux::from_publisher(TryMapPublisher {
            upstream: self,
            f: Arc::new(move |value: T| -> Result<U, StreamError> { Ok(f(value)) }),
            capture: None,
        })
    }

    /// Transform every value with a fallible `f`.
    ///
    /// An `Err` is a per-element failure carrying the input value: an
    /// `on_error_continue` placed directly below drops it and keeps going,
    /// anything else ends the stream with that error.
    pub fn try_map<U, F>(self, f: F) -> Flux<U>
    where
        T: Clone + fmt::Debug,
        U: Send + 'static,
        F: Fn(T) -> Result<U, StreamError> + Send + Sync + 'static,
    {
        Flux::from_publisher(TryMapPublisher {
            upstream: self,
            f: Arc::new(f),
            capture: Some(Arc::new(|value: &T| Box::new(value.clone()) as FailedElement)),
        })
    }

    /// Emit at most `limit` values, then cancel upstream and complete.
    pub fn take(self, limit: usize) -> Self {
        Self::from_publisher(TakePublisher {
            upstream: self,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;
    use parking_lot::Mutex;

    fn signals<T: Send + 'static>(flux: &Flux<T>) -> Vec<Signal<T>> {
        let mut source = flux.open();
        let mut out = Vec::new();
        for _ in 0..64 {
            if let Poll::Ready(event) = source.poll_next() {
                let signal = event.into_signal();
                let terminal = signal.is_terminal();
                out.push(signal);
                if terminal {
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn test_map() {
        let flux = Flux::range(1, 3).map(|v| v * 10);
        assert_eq!(
            signals(&flux),
            vec![Signal::Next(10), Signal::Next(20), Signal::Next(30), Signal::Complete]
        );
    }

    #[test]
    fn test_try_map_failure_reports_element() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);

        let flux = Flux::range(1, 4)
            .try_map(|v| {
                if v % 2 == 0 {
                    Err(StreamError::illegal_argument(format!("even {}", v)))
                } else {
                    Ok(v)
                }
            })
            .on_error_continue(move |_, element| {
                seen_cb.lock().push(format!("{:?}", element.unwrap()));
            });

        assert_eq!(
            signals(&flux),
            vec![Signal::Next(1), Signal::Next(3), Signal::Complete]
        );
        assert_eq!(*seen.lock(), vec!["2".to_string(), "4".to_string()]);
    }

    #[test]
    fn test_try_map_failure_without_continue_is_terminal() {
        let flux = Flux::range(1, 4)
            .try_map(|v| if v == 2 { Err(StreamError::runtime("two")) } else { Ok(v) })
            .on_error_return(0);
        assert_eq!(
            signals(&flux),
            vec![Signal::Next(1), Signal::Next(0), Signal::Complete]
        );
    }

    #[test]
    fn test_take_cancels_upstream() {
        let flux = Flux::range(0, 100).take(2);
        assert_eq!(
            signals(&flux),
            vec![Signal::Next(0), Signal::Next(1), Signal::Complete]
        );

        let flux = Flux::<i32>::never().take(0);
        assert_eq!(signals(&flux), vec![Signal::Complete]);
    }
}
