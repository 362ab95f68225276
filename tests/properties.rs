//! Property tests over randomly shaped streams.

use proptest::prelude::*;
use reflux::{CollectSubscriber, Emit, Flux, Signal, StreamError, Subscription, UNBOUNDED};

/// One merge branch: its values and whether it fails after them.
type BranchShape = (Vec<i32>, bool);

fn branch((values, fails): &BranchShape) -> Flux<i32> {
    let values = Flux::just(values.clone());
    if *fails {
        Flux::merge([values, Flux::error(StreamError::runtime("branch failed"))]).on_error_stop()
    } else {
        values
    }
}

fn collect(flux: &Flux<i32>, chunk: u64) -> Vec<Signal<i32>> {
    let collector = CollectSubscriber::new();
    let subscription = Subscription::new(flux.clone(), Box::new(collector.clone()));
    let mut rounds = 0;
    while !subscription.is_terminated() && rounds < 10_000 {
        subscription.request(chunk);
        rounds += 1;
    }
    collector.take_all()
}

/// Values where `true` marks a failing element.
fn flaky(items: Vec<(i32, bool)>) -> Flux<i32> {
    Flux::generate(
        || 0usize,
        move |index| {
            let Some(&(value, fails)) = items.get(*index) else {
                return Emit::Complete;
            };
            *index += 1;
            if fails {
                Emit::Fail(StreamError::illegal_argument(format!("bad {}", value)))
            } else {
                Emit::Next(value)
            }
        },
    )
}

fn branches() -> impl Strategy<Value = Vec<BranchShape>> {
    prop::collection::vec(
        (prop::collection::vec(-100i32..100, 0..8), prop::bool::weighted(0.3)),
        0..6,
    )
}

proptest! {
    #[test]
    fn resubscription_replays_identically(shapes in branches()) {
        let flux = Flux::merge(shapes.iter().map(branch));
        prop_assert_eq!(collect(&flux, UNBOUNDED), collect(&flux, UNBOUNDED));
    }

    #[test]
    fn bounded_demand_matches_unbounded(shapes in branches(), chunk in 1u64..5) {
        let flux = Flux::merge(shapes.iter().map(branch));
        prop_assert_eq!(collect(&flux, chunk), collect(&flux, UNBOUNDED));
    }

    #[test]
    fn merge_forwards_until_first_failure(shapes in branches()) {
        let flux = Flux::merge(shapes.iter().map(branch));
        let signals = collect(&flux, UNBOUNDED);

        // Eager branches drain in declared order
        let mut expected = Vec::new();
        let mut failed = false;
        for (values, fails) in &shapes {
            expected.extend(values.iter().copied().map(Signal::Next));
            if *fails {
                failed = true;
                break;
            }
        }
        expected.push(if failed {
            Signal::Error(StreamError::runtime("branch failed"))
        } else {
            Signal::Complete
        });
        prop_assert_eq!(signals, expected);
    }

    #[test]
    fn continue_drops_exactly_failed_elements(
        items in prop::collection::vec((any::<i32>(), prop::bool::weighted(0.25)), 0..32)
    ) {
        let dropped = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&dropped);
        let flux = flaky(items.clone()).on_error_continue(move |_, _| {
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        });

        let signals = collect(&flux, UNBOUNDED);

        let mut expected: Vec<_> = items
            .iter()
            .filter(|(_, fails)| !fails)
            .map(|(value, _)| Signal::Next(*value))
            .collect();
        expected.push(Signal::Complete);
        prop_assert_eq!(signals, expected);
        prop_assert_eq!(
            dropped.load(std::sync::atomic::Ordering::Relaxed),
            items.iter().filter(|(_, fails)| *fails).count()
        );
    }

    #[test]
    fn complete_never_adds_values(shapes in branches()) {
        let plain = collect(&Flux::merge(shapes.iter().map(branch)), UNBOUNDED);
        let completed = collect(
            &Flux::merge(shapes.iter().map(branch)).on_error_complete(),
            UNBOUNDED,
        );

        prop_assert_eq!(&plain[..plain.len() - 1], &completed[..completed.len() - 1]);
        prop_assert_eq!(completed.last(), Some(&Signal::Complete));
    }
}
