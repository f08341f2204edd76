use std::any::type_name;
use std::fmt;
use std::num::NonZero;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, trace};

use crate::{
    Admission, Chunk, Coordinator, ERR_POISONED_LOCK, Error, Handle, MemoryReport, Placement,
    PoolId, Result, SlotRef, TypedPoolBuilder,
};

/// A pool of objects of type `T`, organized in fixed-population chunks of reusable slots.
///
/// Allocating places the object into the first chunk that has a free slot. If every chunk is
/// full, the pool asks its [`Coordinator`] for permission to add one more chunk and fails with
/// [`Error::GrowthDenied`] if permission is refused. Chunks are never removed.
///
/// Allocation returns a [`Handle<T>`]. Slots whose handles have all been dropped stay allocated
/// until the pool is swept, either explicitly via [`sweep()`][Self::sweep] or by the coordinator
/// when memory usage reaches its sweep threshold.
///
/// This type acts as a cloneable handle to shared state. All clones refer to the same pool.
///
/// # Thread safety
///
/// The pool can be shared between threads. Allocation and sweeping are serialized by a lock
/// that covers all chunks of the pool. The lock is never held while talking to the coordinator,
/// so a sweep triggered by one pool may freely sweep every other pool, including itself.
///
/// Growth is serialized across all pools of a coordinator. A pool that is waiting to grow
/// first looks again for a free slot, so concurrent allocations into a full pool add only as
/// many chunks as they need and never more than the capacity allows.
///
/// # Example
///
/// ```rust
/// use std::num::NonZero;
///
/// use sweep_pool::{Coordinator, TypedPool};
///
/// let coordinator = Coordinator::new();
/// let pool = TypedPool::<u64>::builder(&coordinator)
///     .chunk_population(NonZero::new(2).unwrap())
///     .build();
///
/// let a = pool.allocate(1).unwrap();
/// let b = pool.allocate(2).unwrap();
/// let c = pool.allocate(3).unwrap();
///
/// assert_eq!(pool.chunk_count(), 2);
/// assert_eq!(pool.len(), 3);
/// assert_eq!(pool.vacant(), 1);
/// # drop((a, b, c));
/// ```
pub struct TypedPool<T> {
    inner: Arc<PoolInner<T>>,
}

struct PoolInner<T> {
    /// Append-only. First-fit placement scans this in order.
    chunks: Mutex<Vec<Chunk<T>>>,

    population: NonZero<usize>,

    coordinator: Coordinator,
    id: PoolId,
}

/// Outcome of a first-fit search over the chunks of a pool.
enum Search<T> {
    Found(SlotRef<T>),

    /// Every chunk is full. The value is handed back so the caller can grow the pool.
    Unavailable(T),
}

impl<T: Send + Sync + 'static> TypedPool<T> {
    /// Creates a pool with the default chunk population and attaches it to the coordinator.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[must_use]
    pub fn new(coordinator: &Coordinator) -> Self {
        Self::builder(coordinator).build()
    }

    /// Starts building a new [`TypedPool`] attached to the coordinator.
    pub fn builder(coordinator: &Coordinator) -> TypedPoolBuilder<T> {
        TypedPoolBuilder::new(coordinator)
    }

    #[must_use]
    pub(crate) fn new_inner(coordinator: &Coordinator, population: NonZero<usize>) -> Self {
        // The coordinator only holds weak references, so registrations do not keep the pool
        // alive. Dropping the pool detaches them.
        let inner = Arc::new_cyclic(|pool: &Weak<PoolInner<T>>| {
            let reporter = Weak::clone(pool);
            let sweeper = Weak::clone(pool);
            let printer = Weak::clone(pool);

            let id = coordinator.attach_pool(
                move || reporter.upgrade().map_or(0, |pool| pool.usage_bytes()),
                move || sweeper.upgrade().map_or(0, |pool| pool.sweep()),
                move |report| {
                    if let Some(pool) = printer.upgrade() {
                        pool.dump(report);
                    }
                },
            );

            PoolInner {
                chunks: Mutex::new(Vec::new()),
                population,
                coordinator: coordinator.clone(),
                id,
            }
        });

        Self { inner }
    }

    /// Places a value into the pool and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GrowthDenied`] if every chunk is full and the coordinator does not
    /// allow the pool to add another chunk.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sweep_pool::{Coordinator, TypedPool};
    ///
    /// let coordinator = Coordinator::new();
    /// let pool = TypedPool::<String>::new(&coordinator);
    ///
    /// let handle = pool.allocate("hello".to_string()).unwrap();
    /// assert_eq!(*handle, "hello");
    /// ```
    pub fn allocate(&self, value: T) -> Result<Handle<T>> {
        let slot = match self.inner.search(value) {
            Search::Found(slot) => slot,
            Search::Unavailable(value) => self.inner.grow_and_search(value)?,
        };

        debug_assert_eq!(slot.count(), 1);

        trace!(
            type_name = type_name::<T>(),
            index = slot.index(),
            reused = slot.reused(),
            "allocated slot"
        );

        Ok(Handle::from_slot(slot))
    }

    /// Returns every allocated slot whose reference count is zero to the free sequence of its
    /// chunk, making it available for future allocations.
    ///
    /// Returns the number of slots reclaimed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sweep_pool::{Coordinator, TypedPool};
    ///
    /// let coordinator = Coordinator::new();
    /// let pool = TypedPool::<u32>::new(&coordinator);
    ///
    /// let handle = pool.allocate(1).unwrap();
    /// drop(handle);
    ///
    /// assert_eq!(pool.len(), 1);
    /// assert_eq!(pool.sweep(), 1);
    /// assert!(pool.is_empty());
    /// ```
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Number of allocated slots, including slots whose handles have all been dropped but which
    /// have not been swept yet.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn len(&self) -> usize {
        self.inner.lock_chunks().iter().map(Chunk::len).sum()
    }

    /// Whether the pool has no allocated slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock_chunks().iter().all(Chunk::is_empty)
    }

    /// Number of free slots across all chunks.
    #[must_use]
    pub fn vacant(&self) -> usize {
        self.inner.lock_chunks().iter().map(Chunk::vacant).sum()
    }

    /// Total number of slots across all chunks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Number of chunks the pool has grown to.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.inner.lock_chunks().len()
    }

    /// Number of slots in each chunk.
    #[must_use]
    pub fn population(&self) -> usize {
        self.inner.population.get()
    }

    /// Bytes of item storage in each chunk. This is what the pool requests from the
    /// coordinator when it grows.
    #[must_use]
    pub fn chunk_bytes(&self) -> usize {
        self.inner.chunk_bytes()
    }

    /// Bytes of item storage committed by all chunks of the pool.
    #[must_use]
    pub fn usage_bytes(&self) -> usize {
        self.inner.usage_bytes()
    }

    /// The coordinator the pool is attached to.
    #[must_use]
    pub fn coordinator(&self) -> &Coordinator {
        &self.inner.coordinator
    }
}

impl<T> PoolInner<T> {
    fn lock_chunks(&self) -> MutexGuard<'_, Vec<Chunk<T>>> {
        self.chunks.lock().expect(ERR_POISONED_LOCK)
    }

    fn chunk_bytes(&self) -> usize {
        self.population
            .get()
            .checked_mul(size_of::<T>())
            .expect("a chunk that does not fit in virtual memory could never have been allocated")
    }

    fn capacity(&self) -> usize {
        self.lock_chunks()
            .len()
            .checked_mul(self.population.get())
            .expect("a pool cannot hold more slots than fit in virtual memory")
    }

    fn usage_bytes(&self) -> usize {
        self.capacity()
            .checked_mul(size_of::<T>())
            .expect("a pool cannot use more bytes than fit in virtual memory")
    }

    fn search(&self, value: T) -> Search<T> {
        first_fit(&mut self.lock_chunks(), value)
    }

    /// Asks the coordinator for room for one more chunk and, if granted, appends a chunk and
    /// repeats the first-fit search. Only called without holding the chunk lock, as the
    /// coordinator may sweep this very pool before answering.
    fn grow_and_search(&self, value: T) -> Result<SlotRef<T>> {
        let _growth = self.coordinator.lock_growth();

        // Another thread may have added a chunk while this one waited for its turn to grow.
        let value = match self.search(value) {
            Search::Found(slot) => return Ok(slot),
            Search::Unavailable(value) => value,
        };

        let requested_bytes = self.chunk_bytes();

        if let Admission::Denied {
            usage_bytes,
            capacity_bytes,
        } = self.coordinator.admit(requested_bytes)
        {
            debug!(
                type_name = type_name::<T>(),
                requested_bytes, usage_bytes, capacity_bytes, "pool growth denied"
            );

            return Err(Error::GrowthDenied {
                type_name: type_name::<T>(),
                requested_bytes,
                usage_bytes,
                capacity_bytes,
            });
        }

        let mut chunks = self.lock_chunks();

        // The sweep that may have preceded admission can have freed a slot in this pool.
        let value = match first_fit(&mut chunks, value) {
            Search::Found(slot) => return Ok(slot),
            Search::Unavailable(value) => value,
        };

        chunks.push(Chunk::new(self.population));

        debug!(
            type_name = type_name::<T>(),
            chunk_count = chunks.len(),
            population = self.population.get(),
            "added chunk to pool"
        );

        match first_fit(&mut chunks, value) {
            Search::Found(slot) => Ok(slot),
            Search::Unavailable(_) => panic!(
                "pool of {} has no free slot right after adding a chunk",
                type_name::<T>()
            ),
        }
    }

    fn sweep(&self) -> usize {
        let reclaimed = self.lock_chunks().iter_mut().map(Chunk::sweep).sum();

        trace!(type_name = type_name::<T>(), reclaimed, "swept pool");

        reclaimed
    }

    fn dump(&self, report: &mut MemoryReport) {
        for (chunk_index, chunk) in self.lock_chunks().iter().enumerate() {
            chunk.dump(chunk_index, report);
        }
    }
}

/// Places the value into the first chunk in list order that is not full.
fn first_fit<T>(chunks: &mut [Chunk<T>], value: T) -> Search<T> {
    let Some(chunk) = chunks.iter_mut().find(|chunk| !chunk.is_full()) else {
        return Search::Unavailable(value);
    };

    match chunk.allocate(value) {
        Placement::Placed(slot) => Search::Found(slot),
        Placement::Full(_) => panic!(
            "chunk of {} reported free slots but refused the allocation",
            type_name::<T>()
        ),
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        self.coordinator.detach_pool(self.id);
    }
}

impl<T> Clone for TypedPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for TypedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("population", &self.inner.population)
            .field("chunk_count", &self.inner.lock_chunks().len())
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}
