//! Same as `fill_memory_twice` but with a 64-byte item type, showing that the chunk size in
//! bytes follows the item size.

use std::num::NonZero;

use sweep_pool::{Coordinator, TypedPool};

const POPULATION: usize = 10;

#[derive(Clone, Copy, Debug)]
struct Block {
    #[allow(dead_code, reason = "only the size matters")]
    bytes: [u8; 64],
}

impl Default for Block {
    fn default() -> Self {
        Self { bytes: [0; 64] }
    }
}

fn main() {
    let coordinator = Coordinator::new();

    let pool = TypedPool::<Block>::builder(&coordinator)
        .chunk_population(NonZero::new(POPULATION).unwrap())
        .build();

    for _ in 0..POPULATION * 2 {
        drop(pool.allocate(Block::default()).unwrap());
    }

    println!(
        "{} chunks of {} bytes each, {} bytes committed",
        pool.chunk_count(),
        pool.chunk_bytes(),
        coordinator.usage_bytes()
    );

    let reclaimed = coordinator.sweep_memory();
    println!("Sweep reclaimed {reclaimed} slots");
}
