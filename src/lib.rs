//! # Reflux
//!
//! A pull-driven reactive stream runtime with composable error handling.
//!
//! ## Core Concepts
//!
//! - **Flux**: A restartable blueprint of a signal sequence; every
//!   subscription replays it from the start
//! - **Signals**: `onNext` values followed by at most one `onError` or
//!   `onComplete`
//! - **Subscriptions**: Demand-driven delivery to a subscriber, cancellable
//!   from any thread
//! - **Error operators**: Per-element (`on_error_continue`) and terminal
//!   (`on_error_complete`, `on_error_map`, `on_error_resume`,
//!   `on_error_return`) recovery, scoped by error class
//! - **StepVerifier**: Scripted assertions over what a flux emits
//!
//! ## Example
//!
//! ```
//! use reflux::{ErrorClass, Flux, StepVerifier, StreamError};
//!
//! let flux = Flux::merge([
//!     Flux::just(vec![1, 2, 3]),
//!     Flux::error(StreamError::runtime("sensor offline")),
//!     Flux::just(vec![6, 7, 8]),
//! ])
//! .on_error_continue(|_, _| {});
//!
//! StepVerifier::create(flux)
//!     .expect_next([1, 2, 3, 6, 7, 8])
//!     .expect_complete()
//!     .verify();
//!
//! let flux = Flux::<i32>::error(StreamError::illegal_argument("bad input"))
//!     .on_error_return_for(ErrorClass::RUNTIME_FAILURE, -1);
//!
//! StepVerifier::create(flux)
//!     .expect_next([-1])
//!     .expect_complete()
//!     .verify();
//! ```

pub mod error;
pub mod operators;
pub mod publisher;
pub mod signal;
pub mod subscriber;
pub mod subscription;
pub mod verifier;

// Re-exports
pub use error::{ErrorClass, Result, StreamError, VerifyError};
pub use operators::{ErrorDispatch, ErrorMapper, Fallback};
pub use publisher::{Emit, Flux, Publisher, Source};
pub use signal::{Event, FailedElement, Signal};
pub use subscriber::{
    ChannelSubscriber, CollectSubscriber, FnSubscriber, SignalIter, SignalReceiver, Subscriber,
};
pub use subscription::{
    Subscription, SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionState,
    UNBOUNDED,
};
pub use verifier::{StepVerifier, VerifierConfig, VerifyReport};
