//! Pipeline throughput benchmarks.

use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_core::{AsyncPolicy, Source, Stream};

fn sync_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_chain");
    for count in [100u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let (trigger, stream) = Stream::channel();
            let total = Rc::new(Cell::new(0u64));
            let sum = total.clone();
            let tail = stream
                .map(|n: u64| n * 2)
                .unwrap()
                .filter(|n| n % 3 != 0)
                .unwrap()
                .read(move |n| sum.set(sum.get() + n))
                .unwrap();
            tail.attach_to_root().unwrap();

            b.iter(|| {
                for n in 0..count {
                    trigger.emit(black_box(n));
                }
            });
            tail.destroy();
        });
    }
    group.finish();
}

fn async_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("async_map");
    for policy in [AsyncPolicy::Ordered, AsyncPolicy::Direct, AsyncPolicy::DropIncoming] {
        group.bench_function(format!("{policy:?}"), |b| {
            let (trigger, stream) = Stream::channel();
            let tail = stream
                .async_map(policy, |n: u64, _| Source::value(n + 1))
                .unwrap()
                .read(|n| {
                    black_box(n);
                })
                .unwrap();
            tail.attach_to_root().unwrap();

            b.iter(|| {
                for n in 0..1_000u64 {
                    trigger.emit(n);
                }
            });
            tail.destroy();
        });
    }
    group.finish();
}

fn build_and_destroy(c: &mut Criterion) {
    c.bench_function("build_and_destroy", |b| {
        b.iter(|| {
            let tail = Stream::of(0..16u32)
                .map(|n| n + 1)
                .unwrap()
                .take(8)
                .unwrap()
                .read(|_| {})
                .unwrap();
            tail.attach_to_root().unwrap();
            black_box(tail.is_destroyed())
        });
    });
}

criterion_group!(benches, sync_chain, async_map, build_and_destroy);
criterion_main!(benches);
