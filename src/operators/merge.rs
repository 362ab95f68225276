//! N-ary merge.

use super::Upstream;
use crate::publisher::{Flux, Publisher, Source};
use crate::signal::Event;
use std::task::Poll;
use tracing::debug;

struct MergePublisher<T> {
    branches: Vec<Flux<T>>,
}

impl<T: Send + 'static> Publisher<T> for MergePublisher<T> {
    fn open(&self) -> Box<dyn Source<T>> {
        let branches: Vec<_> = self
            .branches
            .iter()
            .map(|branch| Some(Upstream::open(branch)))
            .collect();
        let active = branches.len();
        Box::new(MergeSource {
            branches,
            active,
            done: false,
        })
    }
}

/// Live merge state: one slot per declared branch, `None` once a branch
/// has terminated.
struct MergeSource<T> {
    branches: Vec<Option<Upstream<T>>>,
    active: usize,
    done: bool,
}

impl<T: Send + 'static> MergeSource<T> {
    fn retire(&mut self, index: usize) {
        if self.branches[index].take().is_some() {
            self.active -= 1;
        }
    }
}

impl<T: Send + 'static> Source<T> for MergeSource<T> {
    fn poll_next(&mut self) -> Poll<Event<T>> {
        if self.done {
            return Poll::Pending;
        }

        // Scan in declared order; the first branch with something ready
        // wins, so eager branches drain before later ones get a turn.
        for index in 0..self.branches.len() {
            let Some(branch) = self.branches[index].as_mut() else {
                continue;
            };
            match branch.poll() {
                Poll::Pending => continue,
                Poll::Ready(Event::Complete) => {
                    self.retire(index);
                }
                Poll::Ready(Event::Error(error)) => {
                    // The branch is over, but the merge itself can keep
                    // going if the stage below recovers per element.
                    debug!(branch = index, class = %error.class, "merge branch failed");
                    self.retire(index);
                    return Poll::Ready(Event::ElementFailure {
                        error,
                        element: None,
                    });
                }
                Poll::Ready(event) => return Poll::Ready(event),
            }
        }

        if self.active == 0 {
            self.done = true;
            return Poll::Ready(Event::Complete);
        }
        Poll::Pending
    }

    fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        for branch in self.branches.iter_mut().flatten() {
            branch.cancel();
        }
        self.branches.clear();
        self.active = 0;
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Interleave the signals of several publishers.
    ///
    /// Values are forwarded in the order branches produce them; when more
    /// than one branch is ready, the earliest declared one goes first.
    /// The merge completes once every branch completed. A branch error
    /// ends the merge with that error (cancelling the other branches)
    /// unless `on_error_continue` sits directly below it, in which case the
    /// failed branch is dropped and the others keep flowing.
    pub fn merge<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = Flux<T>>,
    {
        Self::from_publisher(MergePublisher {
            branches: sources.into_iter().collect(),
        })
    }

    /// Merge this publisher with `other`.
    pub fn merge_with(self, other: Flux<T>) -> Self {
        Self::merge([self, other])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::publisher::Emit;

    fn collect<T: Send + 'static>(flux: &Flux<T>) -> Vec<Event<T>> {
        let mut source = flux.open();
        let mut events = Vec::new();
        let mut idle = 0;
        while idle < 16 {
            match source.poll_next() {
                Poll::Ready(event) => {
                    idle = 0;
                    let terminal = event.is_terminal();
                    events.push(event);
                    if terminal {
                        break;
                    }
                }
                Poll::Pending => idle += 1,
            }
        }
        events
    }

    fn describe<T: std::fmt::Debug>(events: &[Event<T>]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                Event::Next(v) => format!("{:?}", v),
                Event::ElementFailure { error, .. } => format!("fail:{}", error.class),
                Event::Error(error) => format!("error:{}", error.class),
                Event::Complete => "complete".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_eager_branches_drain_in_declared_order() {
        let merged = Flux::merge([Flux::just(vec![1, 2]), Flux::just(vec![3, 4])]);
        assert_eq!(
            describe(&collect(&merged)),
            vec!["1", "2", "3", "4", "complete"]
        );
    }

    #[test]
    fn test_branch_error_is_reported_per_branch() {
        let merged = Flux::merge([
            Flux::just(vec![1]),
            Flux::error(StreamError::runtime("a")),
            Flux::error(StreamError::illegal_argument("b")),
            Flux::just(vec![2]),
        ]);
        assert_eq!(
            describe(&collect(&merged)),
            vec![
                "1",
                "fail:RuntimeFailure",
                "fail:IllegalArgument",
                "2",
                "complete"
            ]
        );
    }

    #[test]
    fn test_pending_branch_lets_others_through() {
        // Emits 10 only on its second pull
        let slow = Flux::generate(
            || 0,
            |n| {
                *n += 1;
                match *n {
                    1 => Emit::Pending,
                    2 => Emit::Next(10),
                    _ => Emit::Complete,
                }
            },
        );
        let merged = Flux::merge([slow, Flux::just(vec![1, 2])]);
        assert_eq!(
            describe(&collect(&merged)),
            vec!["1", "10", "2", "complete"]
        );
    }

    #[test]
    fn test_empty_merge_completes() {
        let merged = Flux::<i32>::merge(Vec::new());
        assert_eq!(describe(&collect(&merged)), vec!["complete"]);
    }

    #[test]
    fn test_cancel_stops_all_branches() {
        let merged = Flux::merge([Flux::just(vec![1, 2]), Flux::just(vec![3])]);
        let mut source = merged.open();
        assert!(matches!(source.poll_next(), Poll::Ready(Event::Next(1))));
        source.cancel();
        source.cancel();
        assert!(source.poll_next().is_pending());
    }
}
