//! Typed object pools that hand out reference-counted handles and reclaim memory in batches.
//!
//! For each object type, a [`TypedPool<T>`] carves memory into fixed-population chunks of
//! reusable slots. Allocating returns a [`Handle<T>`] that dereferences to the object. Cloning a
//! handle increments the reference count of its slot and dropping a handle decrements it.
//!
//! Dropping the last handle does **not** free the slot. Slots whose count has reached zero are
//! returned to their chunk's free list only by an explicit sweep, either requested directly or
//! triggered by the [`Coordinator`] when memory pressure builds up. This turns many small
//! reclaim operations into one linear pass that is paid for only when needed.
//!
//! # Memory budget
//!
//! Every pool is attached to a [`Coordinator`] that sums the memory committed by all of its
//! pools, regardless of their item type. Before a pool adds a chunk, it asks the coordinator for
//! permission:
//!
//! * If total usage has reached the sweep threshold, every attached pool is swept first.
//! * If the new chunk would push total usage beyond the hard capacity, growth is denied and the
//!   allocation fails with [`Error::GrowthDenied`].
//!
//! Without a configured capacity, growth is unconditional.
//!
//! # Example
//!
//! ```rust
//! use std::num::NonZero;
//!
//! use sweep_pool::{Coordinator, TypedPool};
//!
//! let coordinator = Coordinator::builder().capacity_bytes(1024).build();
//!
//! let pool = TypedPool::<u64>::builder(&coordinator)
//!     .chunk_population(NonZero::new(4).unwrap())
//!     .build();
//!
//! let first = pool.allocate(42).unwrap();
//! let second = first.clone();
//! assert_eq!(*second, 42);
//!
//! drop(first);
//! drop(second);
//!
//! // The slot is only reclaimed once a sweep observes its zero count.
//! assert_eq!(pool.len(), 1);
//! assert_eq!(pool.sweep(), 1);
//! assert_eq!(pool.len(), 0);
//! ```
//!
//! # Process-wide pools
//!
//! The free functions [`allocate()`], [`sweep_memory()`] and [`print_memory()`] operate on a
//! lazily created process-wide coordinator with one pool per type. Configure it with
//! [`configure_global()`] before first use if the defaults do not fit.
//!
//! ```rust
//! let handle = sweep_pool::allocate(String::from("hello")).unwrap();
//! assert_eq!(*handle, "hello");
//! ```

mod builder;
mod chunk;
mod constants;
mod coordinator;
mod error;
mod global;
mod handle;
mod pool;
mod report;
mod slot;

pub use builder::*;
pub(crate) use chunk::*;
pub(crate) use constants::*;
pub use coordinator::*;
pub use error::*;
pub use global::*;
pub use handle::*;
pub use pool::*;
pub use report::*;
pub(crate) use slot::*;
