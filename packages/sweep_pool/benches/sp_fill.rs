//! Allocation benchmarks for the `sweep_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::num::NonZero;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use sweep_pool::{Coordinator, TypedPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = u64;
const TEST_VALUE: TestItem = 1024;

const POPULATION: usize = 10;

#[derive(Clone, Copy, Default)]
struct Block {
    _bytes: [u8; 64],
}

fn new_pool<T: Send + Sync + 'static>(coordinator: &Coordinator) -> TypedPool<T> {
    TypedPool::builder(coordinator)
        .chunk_population(NonZero::new(POPULATION).unwrap())
        .build()
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("sp_fill");

    group.bench_function("fill_memory", |b| {
        b.iter_custom(|iters| {
            let coordinator = Coordinator::new();
            let pool = new_pool::<TestItem>(&coordinator);
            let mut handles = Vec::with_capacity(POPULATION);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..POPULATION {
                    handles.push(black_box(pool.allocate(black_box(TEST_VALUE)).unwrap()));
                }

                handles.clear();
                _ = black_box(pool.sweep());
            }

            start.elapsed()
        });
    });

    group.bench_function("fill_memory_twice", |b| {
        b.iter_custom(|iters| {
            let coordinator = Coordinator::new();
            let pool = new_pool::<TestItem>(&coordinator);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..POPULATION * 2 {
                    drop(black_box(pool.allocate(black_box(TEST_VALUE)).unwrap()));
                }

                _ = black_box(pool.sweep());
            }

            start.elapsed()
        });
    });

    group.bench_function("fill_memory_twice_64b", |b| {
        b.iter_custom(|iters| {
            let coordinator = Coordinator::new();
            let pool = new_pool::<Block>(&coordinator);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..POPULATION * 2 {
                    drop(black_box(pool.allocate(black_box(Block::default())).unwrap()));
                }

                _ = black_box(pool.sweep());
            }

            start.elapsed()
        });
    });

    group.bench_function("clone_drop_handle", |b| {
        let coordinator = Coordinator::new();
        let pool = new_pool::<TestItem>(&coordinator);
        let handle = pool.allocate(TEST_VALUE).unwrap();

        b.iter(|| drop(black_box(handle.clone())));
    });

    group.finish();
}
