//! Benchmarks for transaction propagation.
//!
//! Run with: cargo bench -p confluence-core

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use confluence_core::{Event, EventSink, Transaction};

// ---------------------------------------------------------------------------
// 1. A linear chain of maps
// ---------------------------------------------------------------------------

fn bench_map_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/map_chain");

    for depth in [1u64, 16, 128] {
        group.throughput(Throughput::Elements(depth));

        let sink = EventSink::<u64>::new();
        let mut tail: Event<u64> = Event::clone(&sink);
        for _ in 0..depth {
            tail = tail.map(|x| x.wrapping_add(1));
        }
        let total = Arc::new(AtomicU64::new(0));
        let acc = total.clone();
        let _l = tail.listen(move |x| {
            acc.fetch_add(*x, Ordering::Relaxed);
        });

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| sink.send(black_box(1)))
        });
        black_box(total.load(Ordering::Relaxed));
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. A wide fan-in coalesced into one occurrence per transaction
// ---------------------------------------------------------------------------

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/fan_in");

    for width in [2usize, 16, 64] {
        group.throughput(Throughput::Elements(width as u64));

        let sinks: Vec<EventSink<u64>> = (0..width).map(|_| EventSink::new()).collect();
        let mut merged: Event<u64> = Event::clone(&sinks[0]);
        for sink in &sinks[1..] {
            merged = merged.merge(sink);
        }
        let summed = merged.coalesce(|a, b| a + b);
        let _l = summed.listen(|x| {
            black_box(*x);
        });

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                Transaction::run_void(|| {
                    for sink in &sinks {
                        sink.send(black_box(1));
                    }
                })
            })
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Behavior commits
// ---------------------------------------------------------------------------

fn bench_accum(c: &mut Criterion) {
    let sink = EventSink::<u64>::new();
    let total = sink.accum(0u64, |a, s| a.wrapping_add(*s));

    c.bench_function("propagation/accum", |b| {
        b.iter(|| {
            sink.send(black_box(1));
            black_box(total.sample())
        })
    });
}

criterion_group!(benches, bench_map_chain, bench_fan_in, bench_accum);
criterion_main!(benches);
