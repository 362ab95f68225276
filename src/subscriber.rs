//! Signal consumers.
//!
//! - [`CollectSubscriber`] records every signal in a shared queue.
//! - [`FnSubscriber`] forwards signals to closures.
//! - [`ChannelSubscriber`] pushes signals into a bounded channel and is
//!   read through a [`SignalReceiver`], possibly from another thread.

use crate::error::{ErrorClass, StreamError};
use crate::signal::Signal;
use crate::subscription::{SubscriptionHandle, SubscriptionId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Receives the signals of one subscription.
pub trait Subscriber<T>: Send {
    /// Called once, before any other signal.
    fn on_subscribe(&mut self, handle: SubscriptionHandle) {
        let _ = handle;
    }

    fn on_next(&mut self, value: T);

    fn on_error(&mut self, error: StreamError);

    fn on_complete(&mut self);
}

// --- Collect ---

/// Records signals in arrival order. Clones share the same queue.
pub struct CollectSubscriber<T> {
    signals: Arc<Mutex<VecDeque<Signal<T>>>>,
}

impl<T> Clone for CollectSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            signals: Arc::clone(&self.signals),
        }
    }
}

impl<T> CollectSubscriber<T> {
    pub fn new() -> Self {
        Self {
            signals: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Remove and return the oldest recorded signal.
    pub fn pop(&self) -> Option<Signal<T>> {
        self.signals.lock().pop_front()
    }

    /// Remove and return everything recorded so far.
    pub fn take_all(&self) -> Vec<Signal<T>> {
        self.signals.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.lock().is_empty()
    }

    fn push(&self, signal: Signal<T>) {
        self.signals.lock().push_back(signal);
    }
}

impl<T> Default for CollectSubscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Subscriber<T> for CollectSubscriber<T> {
    fn on_next(&mut self, value: T) {
        self.push(Signal::Next(value));
    }

    fn on_error(&mut self, error: StreamError) {
        self.push(Signal::Error(error));
    }

    fn on_complete(&mut self) {
        self.push(Signal::Complete);
    }
}

// --- Closures ---

type NextFn<T> = Box<dyn FnMut(T) + Send>;
type ErrorFn = Box<dyn FnMut(StreamError) + Send>;
type CompleteFn = Box<dyn FnMut() + Send>;

/// Subscriber built from closures. Unset callbacks ignore their signal.
pub struct FnSubscriber<T> {
    on_next: NextFn<T>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

impl<T> FnSubscriber<T> {
    pub fn new<F>(on_next: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self {
            on_next: Box::new(on_next),
            on_error: None,
            on_complete: None,
        }
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(StreamError) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl<T> Subscriber<T> for FnSubscriber<T> {
    fn on_next(&mut self, value: T) {
        (self.on_next)(value);
    }

    fn on_error(&mut self, error: StreamError) {
        if let Some(f) = self.on_error.as_mut() {
            f(error);
        }
    }

    fn on_complete(&mut self) {
        if let Some(f) = self.on_complete.as_mut() {
            f();
        }
    }
}

// --- Channel ---

/// Pushes signals into a bounded channel.
///
/// A full channel means the consumer is too slow: the subscription is
/// cancelled and an `Overflow` error is offered to the channel (best
/// effort). A dropped receiver cancels the subscription as well.
pub struct ChannelSubscriber<T> {
    sender: Sender<Signal<T>>,
    handle: Option<SubscriptionHandle>,
}

impl<T: Send> ChannelSubscriber<T> {
    /// Create a subscriber and the receiving side of its channel.
    pub fn new(buffer_size: usize) -> (Self, Receiver<Signal<T>>) {
        let (sender, receiver) = bounded(buffer_size.max(1));
        (
            Self {
                sender,
                handle: None,
            },
            receiver,
        )
    }

    fn send(&mut self, signal: Signal<T>) {
        match self.sender.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if let Some(handle) = self.handle.as_ref() {
                    debug!(subscription = handle.id().0, "channel full, dropping subscriber");
                    handle.cancel();
                }
                // Might fail, that's ok
                let _ = self.sender.try_send(Signal::Error(StreamError::new(
                    ErrorClass::OVERFLOW,
                    "subscriber buffer overflowed",
                )));
            }
            Err(TrySendError::Disconnected(_)) => {
                if let Some(handle) = self.handle.as_ref() {
                    debug!(subscription = handle.id().0, "receiver disconnected");
                    handle.cancel();
                }
            }
        }
    }
}

impl<T: Send> Subscriber<T> for ChannelSubscriber<T> {
    fn on_subscribe(&mut self, handle: SubscriptionHandle) {
        self.handle = Some(handle);
    }

    fn on_next(&mut self, value: T) {
        self.send(Signal::Next(value));
    }

    fn on_error(&mut self, error: StreamError) {
        self.send(Signal::Error(error));
    }

    fn on_complete(&mut self) {
        self.send(Signal::Complete);
    }
}

/// Receiving end of a channel-backed subscription.
pub struct SignalReceiver<T> {
    handle: SubscriptionHandle,
    /// Channel to receive signals.
    pub receiver: Receiver<Signal<T>>,
}

impl<T> SignalReceiver<T> {
    pub(crate) fn new(handle: SubscriptionHandle, receiver: Receiver<Signal<T>>) -> Self {
        Self { handle, receiver }
    }

    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    /// Ask the producer side for `n` more values.
    pub fn request(&self, n: u64) {
        self.handle.request(n);
    }

    /// Stop the subscription; the producer side notices on its next drain.
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Receive the next signal (blocking).
    pub fn recv(&self) -> Result<Signal<T>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a signal (non-blocking).
    pub fn try_recv(&self) -> Result<Signal<T>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Signal<T>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Blocking iterator that ends after the terminal signal.
    pub fn iter(&self) -> SignalIter<'_, T> {
        SignalIter {
            receiver: &self.receiver,
            finished: false,
        }
    }
}

/// Iterator returned by [`SignalReceiver::iter`].
pub struct SignalIter<'a, T> {
    receiver: &'a Receiver<Signal<T>>,
    finished: bool,
}

impl<T> Iterator for SignalIter<'_, T> {
    type Item = Signal<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let signal = self.receiver.recv().ok()?;
        self.finished = signal.is_terminal();
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_shares_queue() {
        let collector = CollectSubscriber::new();
        let mut sink = collector.clone();

        sink.on_next(1);
        sink.on_complete();

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.pop(), Some(Signal::Next(1)));
        assert_eq!(collector.take_all(), vec![Signal::Complete]);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_fn_subscriber() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_next = Arc::clone(&seen);
        let seen_err = Arc::clone(&seen);

        let mut sub = FnSubscriber::new(move |v: i32| seen_next.lock().push(v))
            .on_error(move |_| seen_err.lock().push(-1));

        sub.on_next(4);
        Subscriber::on_error(&mut sub, StreamError::runtime("x"));
        Subscriber::on_complete(&mut sub);

        assert_eq!(*seen.lock(), vec![4, -1]);
    }

    #[test]
    fn test_channel_iter_stops_at_terminal() {
        let (mut sub, receiver) = ChannelSubscriber::new(8);
        sub.on_next(1);
        sub.on_next(2);
        sub.on_complete();

        let receiver = SignalReceiver::new(SubscriptionHandle::new(), receiver);
        let signals: Vec<_> = receiver.iter().collect();
        assert_eq!(
            signals,
            vec![Signal::Next(1), Signal::Next(2), Signal::Complete]
        );
    }

    #[test]
    fn test_channel_receiver_timeout() {
        let (_sub, receiver) = ChannelSubscriber::<i32>::new(1);
        let receiver = SignalReceiver::new(SubscriptionHandle::new(), receiver);
        assert!(receiver.recv_timeout(Duration::from_millis(20)).is_err());
    }
}
