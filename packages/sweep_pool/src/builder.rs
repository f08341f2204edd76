use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{
    Coordinator, DEFAULT_CHUNK_POPULATION, DEFAULT_SWEEP_THRESHOLD_PERCENT,
    MAX_SWEEP_THRESHOLD_PERCENT, TypedPool,
};

/// How many slots each chunk of a pool holds.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use sweep_pool::ChunkSizing;
///
/// // 1 KiB worth of u64 slots per chunk.
/// let sizing = ChunkSizing::ByteBudget(NonZero::new(1024).unwrap());
/// assert_eq!(sizing.population_of::<u64>().get(), 128);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ChunkSizing {
    /// Each chunk holds exactly this many slots.
    Population(NonZero<usize>),

    /// Each chunk holds as many slots as fit in this many bytes of item storage.
    ByteBudget(NonZero<usize>),
}

impl ChunkSizing {
    /// The number of slots per chunk for items of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or if the byte budget cannot fit a single `T`.
    #[must_use]
    #[expect(
        clippy::integer_division,
        reason = "partial slots do not exist, so rounding down is intended"
    )]
    pub fn population_of<T>(self) -> NonZero<usize> {
        assert!(
            size_of::<T>() > 0,
            "pooled items must have non-zero size but {} is zero-sized",
            type_name::<T>()
        );

        match self {
            Self::Population(population) => population,
            Self::ByteBudget(bytes) => NonZero::new(bytes.get() / size_of::<T>()).unwrap_or_else(
                || {
                    panic!(
                        "chunk byte budget of {bytes} bytes cannot fit a single {} of {} bytes",
                        type_name::<T>(),
                        size_of::<T>()
                    )
                },
            ),
        }
    }
}

impl Default for ChunkSizing {
    fn default() -> Self {
        Self::Population(DEFAULT_CHUNK_POPULATION)
    }
}

/// Builder for creating an instance of [`Coordinator`].
///
/// # Examples
///
/// ```
/// use sweep_pool::Coordinator;
///
/// let coordinator = Coordinator::builder()
///     .capacity_bytes(64 * 1024)
///     .sweep_threshold_percent(80)
///     .build();
///
/// assert_eq!(coordinator.capacity_bytes(), Some(64 * 1024));
/// assert_eq!(coordinator.sweep_threshold_percent(), 80);
/// ```
#[derive(Clone, Copy, Debug)]
#[must_use]
pub struct CoordinatorBuilder {
    capacity_bytes: Option<usize>,
    sweep_threshold_percent: u8,
}

impl CoordinatorBuilder {
    pub(crate) fn new() -> Self {
        Self {
            capacity_bytes: None,
            sweep_threshold_percent: DEFAULT_SWEEP_THRESHOLD_PERCENT,
        }
    }

    /// Sets a hard limit on the memory all attached pools may commit together.
    ///
    /// Without a capacity, pools grow without limit and are never swept automatically.
    pub fn capacity_bytes(mut self, bytes: usize) -> Self {
        self.capacity_bytes = Some(bytes);
        self
    }

    /// Sets the share of the capacity, in percent, at which requests for more memory trigger a
    /// sweep of every attached pool. Values above 100 are clamped to 100.
    ///
    /// The default is 75.
    ///
    /// # Examples
    ///
    /// ```
    /// use sweep_pool::Coordinator;
    ///
    /// let coordinator = Coordinator::builder().sweep_threshold_percent(250).build();
    /// assert_eq!(coordinator.sweep_threshold_percent(), 100);
    /// ```
    pub fn sweep_threshold_percent(mut self, percent: u8) -> Self {
        self.sweep_threshold_percent = percent.min(MAX_SWEEP_THRESHOLD_PERCENT);
        self
    }

    /// Builds the coordinator with the specified configuration.
    #[must_use]
    pub fn build(self) -> Coordinator {
        Coordinator::new_inner(self.capacity_bytes, self.sweep_threshold_percent)
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating an instance of [`TypedPool`].
///
/// The population per chunk can be given either directly or as a byte budget. Whichever is set
/// last wins. The default is a population of 10 slots.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use sweep_pool::{Coordinator, TypedPool};
///
/// let coordinator = Coordinator::new();
///
/// let pool = TypedPool::<[u8; 64]>::builder(&coordinator)
///     .chunk_byte_budget(NonZero::new(4096).unwrap())
///     .build();
///
/// assert_eq!(pool.population(), 64);
/// ```
#[must_use]
pub struct TypedPoolBuilder<T> {
    coordinator: Coordinator,
    chunk_sizing: ChunkSizing,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for TypedPoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("coordinator", &self.coordinator)
            .field("chunk_sizing", &self.chunk_sizing)
            .finish()
    }
}

impl<T: Send + Sync + 'static> TypedPoolBuilder<T> {
    pub(crate) fn new(coordinator: &Coordinator) -> Self {
        Self {
            coordinator: coordinator.clone(),
            chunk_sizing: ChunkSizing::default(),
            _item: PhantomData,
        }
    }

    /// Sets the number of slots in each chunk.
    pub fn chunk_population(mut self, population: NonZero<usize>) -> Self {
        self.chunk_sizing = ChunkSizing::Population(population);
        self
    }

    /// Sets the number of bytes of item storage in each chunk. The population is the budget
    /// divided by the size of `T`, rounded down.
    pub fn chunk_byte_budget(mut self, bytes: NonZero<usize>) -> Self {
        self.chunk_sizing = ChunkSizing::ByteBudget(bytes);
        self
    }

    /// Sets the chunk sizing directly.
    pub fn chunk_sizing(mut self, sizing: ChunkSizing) -> Self {
        self.chunk_sizing = sizing;
        self
    }

    /// Builds the pool and attaches it to the coordinator.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or if the byte budget cannot fit a single `T`.
    #[must_use]
    pub fn build(self) -> TypedPool<T> {
        TypedPool::new_inner(&self.coordinator, self.chunk_sizing.population_of::<T>())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn nz(value: usize) -> NonZero<usize> {
        NonZero::new(value).unwrap()
    }

    #[test]
    fn population_is_taken_as_is() {
        assert_eq!(ChunkSizing::Population(nz(7)).population_of::<u64>(), nz(7));
    }

    #[test]
    fn byte_budget_rounds_down() {
        assert_eq!(ChunkSizing::ByteBudget(nz(100)).population_of::<u64>(), nz(12));
    }

    #[test]
    #[should_panic]
    fn byte_budget_smaller_than_item_panics() {
        _ = ChunkSizing::ByteBudget(nz(4)).population_of::<u64>();
    }

    #[test]
    #[should_panic]
    fn zero_sized_item_panics() {
        _ = ChunkSizing::Population(nz(4)).population_of::<()>();
    }

    #[test]
    fn default_sizing() {
        assert_eq!(
            ChunkSizing::default().population_of::<u8>(),
            DEFAULT_CHUNK_POPULATION
        );
    }

    #[test]
    fn threshold_is_clamped() {
        let coordinator = Coordinator::builder().sweep_threshold_percent(101).build();

        assert_eq!(coordinator.sweep_threshold_percent(), 100);
    }

    #[test]
    fn coordinator_defaults() {
        let coordinator = Coordinator::builder().build();

        assert_eq!(coordinator.capacity_bytes(), None);
        assert_eq!(
            coordinator.sweep_threshold_percent(),
            DEFAULT_SWEEP_THRESHOLD_PERCENT
        );
    }

    #[test]
    fn last_sizing_wins() {
        let coordinator = Coordinator::new();

        let pool = TypedPool::<u32>::builder(&coordinator)
            .chunk_population(nz(3))
            .chunk_byte_budget(nz(64))
            .build();
        assert_eq!(pool.population(), 16);

        let pool = TypedPool::<u32>::builder(&coordinator)
            .chunk_byte_budget(nz(64))
            .chunk_population(nz(3))
            .build();
        assert_eq!(pool.population(), 3);
    }
}
