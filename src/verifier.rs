//! Scripted verification of a publisher's signal sequence.
//!
//! ```
//! use reflux::{ErrorClass, Flux, StepVerifier, StreamError};
//!
//! let flux = Flux::merge([
//!     Flux::just(vec![1, 2, 3]),
//!     Flux::error(StreamError::runtime("boom")),
//! ]);
//!
//! StepVerifier::create(flux)
//!     .expect_next([1, 2, 3])
//!     .expect_error(ErrorClass::RUNTIME_FAILURE)
//!     .verify();
//! ```

use crate::error::{ErrorClass, Result, StreamError, VerifyError};
use crate::publisher::Flux;
use crate::signal::Signal;
use crate::subscriber::CollectSubscriber;
use crate::subscription::{Subscription, UNBOUNDED};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Verifier configuration.
#[derive(Clone, Debug)]
pub struct VerifierConfig {
    /// Demand requested when verification starts.
    /// Default: UNBOUNDED
    pub initial_request: u64,

    /// Consecutive drains without a new signal before the stream is
    /// declared stalled.
    /// Default: 64
    pub max_idle_rounds: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            initial_request: UNBOUNDED,
            max_idle_rounds: 64,
        }
    }
}

type ValuePredicate<T> = Box<dyn Fn(&T) -> bool>;
type ErrorPredicate = Box<dyn Fn(&StreamError) -> bool>;

enum Step<T> {
    Next(T),
    NextCount(usize),
    NextMatches(String, ValuePredicate<T>),
    Error(ErrorClass),
    ErrorMatches(String, ErrorPredicate),
    ErrorMessage(String),
    Complete,
    Request(u64),
    Cancel,
}

impl<T> Step<T> {
    fn ends_script(&self) -> bool {
        matches!(
            self,
            Step::Error(_)
                | Step::ErrorMatches(..)
                | Step::ErrorMessage(_)
                | Step::Complete
                | Step::Cancel
        )
    }
}

impl<T: fmt::Debug> Step<T> {
    fn describe(&self) -> String {
        match self {
            Step::Next(value) => format!("onNext({:?})", value),
            Step::NextCount(n) => format!("{} more onNext", n),
            Step::NextMatches(description, _) => format!("onNext matching {}", description),
            Step::Error(class) => format!("onError({})", class),
            Step::ErrorMatches(description, _) => format!("onError matching {}", description),
            Step::ErrorMessage(message) => format!("onError with message {:?}", message),
            Step::Complete => "onComplete()".to_string(),
            Step::Request(n) => format!("request({})", n),
            Step::Cancel => "cancel()".to_string(),
        }
    }
}

/// What the verifier observed.
#[derive(Debug)]
pub struct VerifyReport<T> {
    pub signals: Vec<Signal<T>>,
    pub elapsed: Duration,
}

impl<T: Serialize> VerifyReport<T> {
    /// Recorded signals as a JSON array.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.signals)?)
    }
}

/// Builder for an expected signal script, run by `verify`.
pub struct StepVerifier<T> {
    flux: Flux<T>,
    config: VerifierConfig,
    steps: Vec<Step<T>>,
}

impl<T> StepVerifier<T>
where
    T: fmt::Debug + PartialEq + Send + 'static,
{
    pub fn create(flux: Flux<T>) -> Self {
        Self::with_config(flux, VerifierConfig::default())
    }

    pub fn with_config(flux: Flux<T>, config: VerifierConfig) -> Self {
        Self {
            flux,
            config,
            steps: Vec::new(),
        }
    }

    /// Expect these values, in order.
    pub fn expect_next<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        self.steps.extend(values.into_iter().map(Step::Next));
        self
    }

    /// Expect `count` values, whatever they are.
    pub fn expect_next_count(mut self, count: usize) -> Self {
        self.steps.push(Step::NextCount(count));
        self
    }

    /// Expect one value satisfying `predicate`.
    pub fn expect_next_matches<F>(mut self, description: &str, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + 'static,
    {
        self.steps.push(Step::NextMatches(description.to_string(), Box::new(predicate)));
        self
    }

    /// Expect termination with an error of `class` (or a subclass).
    pub fn expect_error(mut self, class: ErrorClass) -> Self {
        self.steps.push(Step::Error(class));
        self
    }

    /// Expect termination with an error satisfying `predicate`.
    pub fn expect_error_matches<F>(mut self, description: &str, predicate: F) -> Self
    where
        F: Fn(&StreamError) -> bool + 'static,
    {
        self.steps.push(Step::ErrorMatches(description.to_string(), Box::new(predicate)));
        self
    }

    /// Expect termination with an error carrying exactly `message`.
    pub fn expect_error_message(mut self, message: &str) -> Self {
        self.steps.push(Step::ErrorMessage(message.to_string()));
        self
    }

    /// Expect normal completion.
    pub fn expect_complete(mut self) -> Self {
        self.steps.push(Step::Complete);
        self
    }

    /// Request `n` more values before checking the following steps.
    pub fn then_request(mut self, n: u64) -> Self {
        self.steps.push(Step::Request(n));
        self
    }

    /// Cancel the subscription; ends the script.
    pub fn then_cancel(mut self) -> Self {
        self.steps.push(Step::Cancel);
        self
    }

    /// Run the script, panicking with a description of the first mismatch.
    pub fn verify(self) -> VerifyReport<T> {
        match self.try_verify() {
            Ok(report) => report,
            Err(e) => panic!("{}", e),
        }
    }

    /// Run the script.
    pub fn try_verify(self) -> Result<VerifyReport<T>> {
        let last = self.steps.len();
        if !self.steps.last().map_or(false, Step::ends_script) {
            return Err(VerifyError::IncompleteScript(last));
        }

        let started = Instant::now();
        let collector = CollectSubscriber::new();
        let subscription = Subscription::new(self.flux, Box::new(collector.clone()));
        let mut run = Run {
            subscription,
            collector,
            max_idle_rounds: self.config.max_idle_rounds,
            observed: Vec::new(),
        };
        debug!(subscription = run.subscription.id().0, steps = last, "verifying script");
        run.subscription.request(self.config.initial_request);

        for (index, step) in self.steps.into_iter().enumerate() {
            let number = index + 1;
            match step {
                Step::Request(n) => run.subscription.request(n),
                Step::Cancel => {
                    run.subscription.cancel();
                    return Ok(run.report(started));
                }
                Step::NextCount(count) => {
                    for _ in 0..count {
                        let expected = Step::<T>::NextCount(count).describe();
                        match run.next_signal(number, &expected)? {
                            Signal::Next(value) => run.observed.push(Signal::Next(value)),
                            other => return Err(run.mismatch(number, expected, other)),
                        }
                    }
                }
                step => {
                    let expected = step.describe();
                    let signal = run.next_signal(number, &expected)?;
                    if step.accepts(&signal) {
                        run.observed.push(signal);
                    } else {
                        return Err(run.mismatch(number, expected, signal));
                    }
                }
            }
        }

        // The script ended on a terminal expectation; nothing may follow.
        run.subscription.drain();
        if let Some(extra) = run.collector.pop() {
            return Err(VerifyError::Unexpected(extra.to_string()));
        }
        Ok(run.report(started))
    }
}

impl<T: PartialEq> Step<T> {
    fn accepts(&self, signal: &Signal<T>) -> bool {
        match (self, signal) {
            (Step::Next(expected), Signal::Next(actual)) => expected == actual,
            (Step::NextMatches(_, predicate), Signal::Next(actual)) => predicate(actual),
            (Step::Error(class), Signal::Error(error)) => error.is_a(class),
            (Step::ErrorMatches(_, predicate), Signal::Error(error)) => predicate(error),
            (Step::ErrorMessage(message), Signal::Error(error)) => &error.message == message,
            (Step::Complete, Signal::Complete) => true,
            _ => false,
        }
    }
}

/// State of one verification run.
struct Run<T> {
    subscription: Subscription<T>,
    collector: CollectSubscriber<T>,
    max_idle_rounds: usize,
    observed: Vec<Signal<T>>,
}

impl<T: fmt::Debug + Send + 'static> Run<T> {
    /// Next recorded signal, draining the subscription as needed.
    fn next_signal(&mut self, step: usize, expected: &str) -> Result<Signal<T>> {
        let mut idle = 0;
        loop {
            if let Some(signal) = self.collector.pop() {
                return Ok(signal);
            }
            if self.subscription.is_terminated() {
                return Err(VerifyError::Mismatch {
                    step,
                    expected: expected.to_string(),
                    actual: "no further signal (subscription terminated)".to_string(),
                    history: self.history(),
                });
            }
            if idle >= self.max_idle_rounds {
                return Err(VerifyError::Stalled {
                    step,
                    expected: expected.to_string(),
                    rounds: idle,
                    history: self.history(),
                });
            }
            self.subscription.drain();
            if self.collector.is_empty() {
                idle += 1;
            }
        }
    }

    fn mismatch(&self, step: usize, expected: String, actual: Signal<T>) -> VerifyError {
        VerifyError::Mismatch {
            step,
            expected,
            actual: actual.to_string(),
            history: self.history(),
        }
    }

    fn history(&self) -> String {
        self.observed
            .iter()
            .map(|signal| signal.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn report(self, started: Instant) -> VerifyReport<T> {
        VerifyReport {
            signals: self.observed,
            elapsed: started.elapsed(),
        }
    }
}
