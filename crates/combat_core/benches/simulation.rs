//! Simulation benchmarks for combat_core.
//!
//! Run with: `cargo bench -p combat_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use std::time::Duration;

use combat_core::queue::EventQueue;
use combat_test_utils::fixtures::{fire_mage, short_config};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

/// Full iterations of a caster rotation at two encounter lengths.
pub fn iteration_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iteration");
    for seconds in [60, 180] {
        let mut sim = fire_mage(short_config(seconds, 1));
        let mut index = 0u64;
        group.bench_function(format!("fire_mage_{seconds}s"), |b| {
            b.iter(|| {
                index += 1;
                black_box(sim.run_iteration(index).expect("iteration"))
            });
        });
    }
    group.finish();
}

/// Raw queue throughput with interleaved cancellation.
pub fn queue_benchmark(c: &mut Criterion) {
    c.bench_function("queue_schedule_pop_10k", |b| {
        b.iter_batched(
            EventQueue::<u32>::new,
            |mut queue| {
                for i in 0..10_000u32 {
                    let handle = queue
                        .schedule(Duration::from_millis(u64::from(i % 997)), i)
                        .expect("schedule");
                    if i % 3 == 0 {
                        queue.cancel(handle);
                    }
                }
                while let Some(fired) = queue.pop_next(Duration::MAX) {
                    black_box(fired.action);
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, iteration_benchmark, queue_benchmark);
criterion_main!(benches);
