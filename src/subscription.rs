//! The live link between one publisher and one subscriber.
//!
//! A subscription moves through `Idle -> Active -> Terminated`:
//! - `Idle` until the first request; the publisher's source is opened then.
//! - `Active` while signals flow; values are delivered against demand.
//! - `Terminated` once a terminal signal was delivered or it was cancelled.
//!
//! The state lives in an atomic so that the terminal transition happens
//! exactly once even when a cancel races with an error or completion from
//! another thread. Draining itself is synchronous: `request` and `drain`
//! pull from the source on the caller's thread.

use crate::publisher::{Flux, Source};
use crate::signal::{Event, Signal};
use crate::subscriber::{ChannelSubscriber, SignalReceiver, Subscriber};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, trace};

/// Demand value meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Active,
    Terminated,
}

const IDLE: u8 = 0;
const ACTIVE: u8 = 1;
const TERMINATED: u8 = 2;

/// Configuration for a channel-backed subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered signals before the consumer is dropped.
    /// Default: 256
    pub buffer_size: usize,

    /// Demand requested as soon as the subscription is created.
    /// Default: UNBOUNDED
    pub initial_request: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            initial_request: UNBOUNDED,
        }
    }
}

struct Shared {
    state: AtomicU8,
    demand: AtomicU64,
    /// Signals handed to the subscriber so far.
    delivered: AtomicU64,
}

/// Thread-safe handle used to request more values or cancel.
///
/// Subscribers receive one in `on_subscribe`. Requesting from inside a
/// subscriber callback only records demand; the drain loop that is
/// currently running picks it up.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    shared: Arc<Shared>,
}

impl SubscriptionHandle {
    pub(crate) fn new() -> Self {
        Self {
            id: SubscriptionId::next(),
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                demand: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        match self.shared.state.load(Ordering::Acquire) {
            IDLE => SubscriptionState::Idle,
            ACTIVE => SubscriptionState::Active,
            _ => SubscriptionState::Terminated,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == SubscriptionState::Terminated
    }

    /// Outstanding demand.
    pub fn demand(&self) -> u64 {
        self.shared.demand.load(Ordering::Acquire)
    }

    /// Number of signals delivered to the subscriber so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Acquire)
    }

    /// Add `n` to the outstanding demand (saturating at `UNBOUNDED`).
    pub fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let _ = self
            .shared
            .demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(n))
            });
        trace!(subscription = self.id.0, n, "demand requested");
    }

    /// Stop the subscription. Returns false if it was already terminated.
    ///
    /// A value whose `on_next` call has already started on another thread
    /// still completes; nothing is delivered after that.
    pub fn cancel(&self) -> bool {
        let mut current = self.shared.state.load(Ordering::Acquire);
        loop {
            if current == TERMINATED {
                return false;
            }
            match self.shared.state.compare_exchange(
                current,
                TERMINATED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(subscription = self.id.0, "subscription cancelled");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn activate(&self) -> bool {
        self.shared
            .state
            .compare_exchange(IDLE, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The single Active -> Terminated transition for a terminal signal.
    fn terminate(&self) -> bool {
        self.shared
            .state
            .compare_exchange(ACTIVE, TERMINATED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn consume_one(&self) {
        let _ = self
            .shared
            .demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
                UNBOUNDED => None,
                0 => None,
                n => Some(n - 1),
            });
    }
}

/// Per-subscription drive state.
struct Drive<T> {
    publisher: Flux<T>,
    source: Option<Box<dyn Source<T>>>,
    /// Dropped once the subscription terminates.
    subscriber: Option<Box<dyn Subscriber<T>>>,
    /// One value pulled without demand while looking for a terminal.
    stash: Option<T>,
}

impl<T: Send + 'static> Drive<T> {
    fn run(&mut self, handle: &SubscriptionHandle) {
        loop {
            match handle.state() {
                SubscriptionState::Terminated => {
                    self.release();
                    return;
                }
                SubscriptionState::Idle => {
                    if handle.demand() == 0 {
                        return;
                    }
                    if !handle.activate() {
                        // Cancelled concurrently
                        continue;
                    }
                    trace!(subscription = handle.id().0, "opening source");
                    self.source = Some(self.publisher.open());
                }
                SubscriptionState::Active => {}
            }

            let has_demand = handle.demand() > 0;
            if let Some(value) = self.stash.take() {
                if !has_demand {
                    self.stash = Some(value);
                    return;
                }
                self.deliver_next(handle, value);
                continue;
            }

            let Some(source) = self.source.as_mut() else {
                return;
            };

            match source.poll_next() {
                Poll::Pending => return,
                Poll::Ready(Event::Next(value)) => {
                    if !has_demand {
                        self.stash = Some(value);
                        return;
                    }
                    self.deliver_next(handle, value);
                }
                Poll::Ready(event) => {
                    // Per-element failures nobody recovered from end the stream.
                    if let Event::ElementFailure { .. } = event {
                        source.cancel();
                    }
                    self.source = None;
                    if handle.terminate() {
                        self.deliver_terminal(handle, event.into_signal());
                    }
                    self.release();
                    return;
                }
            }
        }
    }

    fn deliver_next(&mut self, handle: &SubscriptionHandle, value: T) {
        // A cancel may have landed while the source was being polled
        if handle.is_terminated() {
            return;
        }
        handle.consume_one();
        if let Some(subscriber) = self.subscriber.as_mut() {
            handle.shared.delivered.fetch_add(1, Ordering::AcqRel);
            subscriber.on_next(value);
        }
    }

    fn deliver_terminal(&mut self, handle: &SubscriptionHandle, signal: Signal<T>) {
        let Some(subscriber) = self.subscriber.as_mut() else {
            return;
        };
        handle.shared.delivered.fetch_add(1, Ordering::AcqRel);
        match signal {
            Signal::Error(error) => {
                debug!(
                    subscription = handle.id().0,
                    class = %error.class,
                    "subscription terminated with error"
                );
                subscriber.on_error(error);
            }
            Signal::Complete => {
                debug!(subscription = handle.id().0, "subscription completed");
                subscriber.on_complete();
            }
            Signal::Next(_) => {}
        }
    }

    fn release(&mut self) {
        self.stash = None;
        self.subscriber = None;
        if let Some(mut source) = self.source.take() {
            source.cancel();
        }
    }
}

/// One subscriber attached to one publisher.
pub struct Subscription<T> {
    handle: SubscriptionHandle,
    drive: Mutex<Drive<T>>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Attach `subscriber` to `publisher`. Nothing is pulled until the
    /// first request.
    pub fn new(publisher: Flux<T>, mut subscriber: Box<dyn Subscriber<T>>) -> Self {
        let handle = SubscriptionHandle::new();
        subscriber.on_subscribe(handle.clone());
        Self {
            handle,
            drive: Mutex::new(Drive {
                publisher,
                source: None,
                subscriber: Some(subscriber),
                stash: None,
            }),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    pub fn state(&self) -> SubscriptionState {
        self.handle.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.handle.is_terminated()
    }

    /// A cloneable handle for cancelling or requesting from elsewhere.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Request `n` more values and deliver what is ready.
    pub fn request(&self, n: u64) {
        self.handle.request(n);
        self.drain();
    }

    /// Deliver whatever the source has ready against current demand.
    ///
    /// Returns when demand is used up, the source reports `Pending`, or
    /// the subscription terminates. Call again to make further progress.
    pub fn drain(&self) {
        self.drive.lock().run(&self.handle);
    }

    /// Drain repeatedly until the subscription terminates.
    ///
    /// Gives up after `max_idle_rounds` consecutive drains that delivered
    /// nothing, returning whether the subscription terminated.
    pub fn run(&self, max_idle_rounds: usize) -> bool {
        let mut idle = 0;
        while !self.is_terminated() && idle < max_idle_rounds {
            let before = self.handle.delivered();
            self.drain();
            if self.handle.delivered() == before {
                idle += 1;
                std::thread::yield_now();
            } else {
                idle = 0;
            }
        }
        self.is_terminated()
    }

    /// Cancel the subscription. Idempotent.
    pub fn cancel(&self) {
        if self.handle.cancel() {
            // A drain in progress on another thread releases the source itself.
            if let Some(mut drive) = self.drive.try_lock() {
                drive.release();
            }
        }
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Attach `subscriber` to this publisher.
    ///
    /// Demand the subscriber requests from `on_subscribe` is served right
    /// away; otherwise nothing is pulled until `request` is called.
    pub fn subscribe<S>(&self, subscriber: S) -> Subscription<T>
    where
        S: Subscriber<T> + 'static,
    {
        let subscription = Subscription::new(self.clone(), Box::new(subscriber));
        if subscription.handle.demand() > 0 {
            subscription.drain();
        }
        subscription
    }

    /// Subscribe with a bounded channel as the consumer.
    ///
    /// The returned subscription has `config.initial_request` demand
    /// recorded but delivers nothing until it is drained, typically on a
    /// producer thread, while the receiver is read elsewhere.
    pub fn subscribe_channel(
        &self,
        config: SubscriptionConfig,
    ) -> (Subscription<T>, SignalReceiver<T>) {
        let (subscriber, receiver) = ChannelSubscriber::new(config.buffer_size);
        let subscription = Subscription::new(self.clone(), Box::new(subscriber));
        subscription.handle.request(config.initial_request);
        let receiver = SignalReceiver::new(subscription.handle(), receiver);
        (subscription, receiver)
    }
}
