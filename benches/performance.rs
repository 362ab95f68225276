//! Performance benchmarks for stream delivery and error operators.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reflux::{
    CollectSubscriber, ErrorClass, Flux, StreamError, Subscription, SubscriptionConfig, UNBOUNDED,
};

fn drain(flux: &Flux<i32>) -> usize {
    let collector = CollectSubscriber::new();
    let subscription = Subscription::new(flux.clone(), Box::new(collector.clone()));
    subscription.request(UNBOUNDED);
    collector.take_all().len()
}

/// Benchmark merge fan-in with a varying number of branches
fn bench_merge_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_fan_in");

    for branches in [2, 16, 128] {
        group.bench_with_input(
            BenchmarkId::new("branches", branches),
            &branches,
            |b, &branches| {
                let flux = Flux::merge((0..branches).map(|_| Flux::range(0, 100)));
                b.iter(|| black_box(drain(&flux)));
            },
        );
    }

    group.finish();
}

/// Benchmark error operator chains of varying depth over a failing merge
fn bench_error_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("error_chain");

    for depth in [1, 8, 32] {
        group.bench_with_input(BenchmarkId::new("map_depth", depth), &depth, |b, &depth| {
            let mut flux = Flux::merge([
                Flux::range(0, 1000),
                Flux::error(StreamError::runtime("fail")),
            ]);
            for _ in 0..depth {
                flux = flux.on_error_map_for(ErrorClass::RUNTIME_FAILURE, |e| {
                    StreamError::illegal_state(e.message)
                });
            }
            b.iter(|| black_box(drain(&flux)));
        });
    }

    group.finish();
}

/// Benchmark per-element recovery with a failure every tenth element
fn bench_continue(c: &mut Criterion) {
    let flux = Flux::range(0, 1000)
        .try_map(|v| {
            if v % 10 == 0 {
                Err(StreamError::illegal_argument("tenth"))
            } else {
                Ok(v)
            }
        })
        .on_error_continue(|_, _| {});

    c.bench_function("on_error_continue_1000", |b| {
        b.iter(|| black_box(drain(&flux)))
    });
}

/// Benchmark channel delivery to a consumer thread
fn bench_channel(c: &mut Criterion) {
    let flux = Flux::range(0, 10_000);

    c.bench_function("channel_10000", |b| {
        b.iter(|| {
            let (subscription, receiver) = flux.subscribe_channel(SubscriptionConfig {
                buffer_size: 16_384,
                ..Default::default()
            });
            let consumer = std::thread::spawn(move || receiver.iter().count());
            subscription.run(8);
            drop(subscription);
            black_box(consumer.join().unwrap_or(0))
        })
    });
}

criterion_group!(
    benches,
    bench_merge_fan_in,
    bench_error_chain,
    bench_continue,
    bench_channel
);
criterion_main!(benches);
