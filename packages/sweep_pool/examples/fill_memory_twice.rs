//! Fills two chunks' worth of `u64` items, dropping every handle right away.
//!
//! Dropped handles do not free their slots until a sweep happens, so the pool has to grow a
//! second chunk even though nothing is alive. A sweep then returns every slot to the free list.

use std::num::NonZero;

use sweep_pool::{Coordinator, TypedPool};

const POPULATION: usize = 10;

fn main() {
    let coordinator = Coordinator::new();

    let pool = TypedPool::<u64>::builder(&coordinator)
        .chunk_population(NonZero::new(POPULATION).unwrap())
        .build();

    for i in 0..POPULATION * 2 {
        drop(pool.allocate(u64::try_from(i).unwrap()).unwrap());
    }

    println!(
        "Before sweep: {} managed slots in {} chunks",
        pool.len(),
        pool.chunk_count()
    );

    let reclaimed = coordinator.sweep_memory();

    println!(
        "After sweep: {reclaimed} slots reclaimed, {} managed, {} vacant",
        pool.len(),
        pool.vacant()
    );
}
