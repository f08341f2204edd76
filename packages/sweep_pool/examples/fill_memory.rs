//! Fills exactly one chunk of a pool:
//!
//! * Creating a pool with a fixed chunk population.
//! * Allocating until the only chunk is full.
//! * Inspecting the slot table.

use std::num::NonZero;

use sweep_pool::{Coordinator, TypedPool};

const POPULATION: usize = 10;

fn main() {
    let coordinator = Coordinator::new();

    let pool = TypedPool::<u64>::builder(&coordinator)
        .chunk_population(NonZero::new(POPULATION).unwrap())
        .build();

    let handles = (0..POPULATION)
        .map(|i| pool.allocate(u64::try_from(i).unwrap()).unwrap())
        .collect::<Vec<_>>();

    println!(
        "Pool holds {} items in {} chunk(s), {} bytes committed",
        pool.len(),
        pool.chunk_count(),
        coordinator.usage_bytes()
    );

    coordinator.print_memory().print_to_stdout();

    let sum: u64 = handles.iter().map(|handle| **handle).sum();
    println!("Sum of pooled values: {sum}");
}
