//! Memory capacity and automatic sweeps across pools of different types.
//!
//! Two pools share a coordinator with a small capacity. Once usage reaches the sweep threshold,
//! every request for more memory sweeps both pools first. When even that does not make room,
//! the allocation fails instead of growing past the capacity.
//!
//! Run with `RUST_LOG=sweep_pool=debug` to see the sweeps and admission decisions as they happen.

use std::num::NonZero;

use sweep_pool::{Coordinator, Error, TypedPool};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Room for four chunks of 4 x u64 (32 bytes each).
    let coordinator = Coordinator::builder()
        .capacity_bytes(128)
        .sweep_threshold_percent(50)
        .build();

    let numbers = TypedPool::<u64>::builder(&coordinator)
        .chunk_population(NonZero::new(4).unwrap())
        .build();
    let labels = TypedPool::<[u8; 8]>::builder(&coordinator)
        .chunk_population(NonZero::new(4).unwrap())
        .build();

    // Garbage in the label pool: allocated and dropped, but not yet swept.
    for _ in 0..4 {
        drop(labels.allocate(*b"discard!").unwrap());
    }

    let mut kept = Vec::new();

    loop {
        match numbers.allocate(42) {
            Ok(handle) => kept.push(handle),
            Err(Error::GrowthDenied {
                usage_bytes,
                capacity_bytes,
                ..
            }) => {
                println!("Growth denied after {} live items", kept.len());
                println!("{usage_bytes} of {capacity_bytes} bytes in use");
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    println!(
        "Label pool was swept on the way: {} managed slots remain",
        labels.len()
    );

    drop(kept);
    println!("Explicit sweep reclaimed {} slots", coordinator.sweep_memory());
}
