//! Process-wide pools, one per item type, sharing one process-wide coordinator.
//!
//! The registry is created on first use and lives until the process exits. It is never torn
//! down, so handles from process-wide pools stay valid for the lifetime of the process.

use std::any::{Any, TypeId, type_name};
use std::sync::{Mutex, OnceLock};

use foldhash::{HashMap, HashMapExt};
use tracing::debug;

use crate::{
    ChunkSizing, Coordinator, CoordinatorBuilder, ERR_POISONED_LOCK, Error, Handle, MemoryReport,
    Result, TypedPool,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Configuration of the process-wide pools, applied with [`configure_global()`].
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use sweep_pool::{ChunkSizing, GlobalConfig};
///
/// let config = GlobalConfig::new()
///     .capacity_bytes(16 * 1024 * 1024)
///     .sweep_threshold_percent(90)
///     .chunk_sizing(ChunkSizing::ByteBudget(NonZero::new(64 * 1024).unwrap()));
/// ```
#[derive(Clone, Copy, Debug, Default)]
#[must_use]
pub struct GlobalConfig {
    coordinator: CoordinatorBuilder,
    chunk_sizing: ChunkSizing,
}

impl GlobalConfig {
    /// Creates the default configuration: no capacity and 10 slots per chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a hard limit on the memory all process-wide pools may commit together.
    pub fn capacity_bytes(mut self, bytes: usize) -> Self {
        self.coordinator = self.coordinator.capacity_bytes(bytes);
        self
    }

    /// Sets the share of the capacity, in percent, at which growth requests trigger a sweep of
    /// every process-wide pool. Values above 100 are clamped to 100.
    pub fn sweep_threshold_percent(mut self, percent: u8) -> Self {
        self.coordinator = self.coordinator.sweep_threshold_percent(percent);
        self
    }

    /// Sets how many slots each chunk of every process-wide pool holds.
    pub fn chunk_sizing(mut self, sizing: ChunkSizing) -> Self {
        self.chunk_sizing = sizing;
        self
    }
}

struct Registry {
    coordinator: Coordinator,
    chunk_sizing: ChunkSizing,

    /// Values are `TypedPool<T>` for the `T` whose `TypeId` is the key.
    pools: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Registry {
    fn new(config: GlobalConfig) -> Self {
        let coordinator = config.coordinator.build();

        debug!(
            capacity_bytes = coordinator.capacity_bytes(),
            sweep_threshold_percent = coordinator.sweep_threshold_percent(),
            "initialized process-wide pools"
        );

        Self {
            coordinator,
            chunk_sizing: config.chunk_sizing,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pool<T: Send + Sync + 'static>(&self) -> TypedPool<T> {
        // Panics for unsupported item types, so it must happen before the lock is taken or the
        // registry would be poisoned for every other type as well.
        let population = self.chunk_sizing.population_of::<T>();

        let mut pools = self.pools.lock().expect(ERR_POISONED_LOCK);

        pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                debug!(type_name = type_name::<T>(), "created process-wide pool");

                Box::new(TypedPool::<T>::new_inner(&self.coordinator, population))
            })
            .downcast_ref::<TypedPool<T>>()
            .expect("pools are keyed by the TypeId of their item type")
            .clone()
    }
}

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry::new(GlobalConfig::default()))
}

/// Configures the process-wide pools.
///
/// This must happen before anything else touches the process-wide pools, as the configuration
/// is fixed when they are initialized.
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] if the process-wide pools have already been
/// configured or used.
pub fn configure_global(config: GlobalConfig) -> Result<()> {
    let mut initialized_here = false;

    REGISTRY.get_or_init(|| {
        initialized_here = true;
        Registry::new(config)
    });

    if initialized_here {
        Ok(())
    } else {
        Err(Error::AlreadyInitialized)
    }
}

/// Allocates an object from the process-wide pool for its type.
///
/// The pool for `T` is created on first use with the process-wide chunk sizing.
///
/// # Errors
///
/// Returns [`Error::GrowthDenied`] if every chunk of the pool is full and the process-wide
/// capacity does not allow another chunk.
///
/// # Panics
///
/// Panics if `T` is zero-sized or if the configured byte budget cannot fit a single `T`.
///
/// # Example
///
/// ```rust
/// let a = sweep_pool::allocate(1_u64).unwrap();
/// let b = sweep_pool::allocate(2_u64).unwrap();
///
/// assert_eq!(*a + *b, 3);
/// ```
pub fn allocate<T: Send + Sync + 'static>(value: T) -> Result<Handle<T>> {
    registry().pool::<T>().allocate(value)
}

/// The process-wide pool for items of type `T`, created on first use.
///
/// # Panics
///
/// Panics if `T` is zero-sized or if the configured byte budget cannot fit a single `T`.
#[must_use]
pub fn global_pool<T: Send + Sync + 'static>() -> TypedPool<T> {
    registry().pool::<T>()
}

/// The coordinator shared by all process-wide pools.
#[must_use]
pub fn global_coordinator() -> &'static Coordinator {
    &registry().coordinator
}

/// Sweeps every process-wide pool, returning the number of slots reclaimed.
pub fn sweep_memory() -> usize {
    registry().coordinator.sweep_memory()
}

/// Collects the slot tables of every process-wide pool into a report.
#[must_use]
pub fn print_memory() -> MemoryReport {
    registry().coordinator.print_memory()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    // The registry is shared by every test in this binary, so these tests only make
    // assertions that hold regardless of what other tests allocated.

    #[test]
    fn same_type_shares_a_pool() {
        struct OnlyHere(u32);

        let a = allocate(OnlyHere(1)).unwrap();
        let b = allocate(OnlyHere(2)).unwrap();

        assert_eq!(a.0, 1);
        assert_eq!(b.0, 2);
        assert_eq!(global_pool::<OnlyHere>().len(), 2);
    }

    #[test]
    fn distinct_types_get_distinct_pools() {
        struct First(#[allow(dead_code, reason = "only the size matters")] u64);
        struct Second(#[allow(dead_code, reason = "only the size matters")] u64);

        let _first = allocate(First(1)).unwrap();

        assert_eq!(global_pool::<First>().len(), 1);
        assert!(global_pool::<Second>().is_empty());
    }

    #[test]
    fn global_sweep_reclaims_dropped_handles() {
        struct Swept(#[allow(dead_code, reason = "only the size matters")] u64);

        drop(allocate(Swept(1)).unwrap());
        assert_eq!(global_pool::<Swept>().len(), 1);

        _ = sweep_memory();

        assert!(global_pool::<Swept>().is_empty());
    }

    #[test]
    fn print_memory_includes_live_slot() {
        struct Printed(#[allow(dead_code, reason = "only the size matters")] u64);

        let _handle = allocate(Printed(7)).unwrap();

        let report = print_memory();

        assert!(
            report
                .records()
                .iter()
                .any(|record| record.type_name().ends_with("Printed") && record.count() == 1)
        );
    }

    #[test]
    fn configuring_after_use_fails() {
        let _handle = allocate(5_u16).unwrap();

        assert!(matches!(
            configure_global(GlobalConfig::new().capacity_bytes(1)),
            Err(Error::AlreadyInitialized)
        ));
        assert_eq!(global_coordinator().capacity_bytes(), None);
    }
}
