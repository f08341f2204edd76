use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::{CoordinatorBuilder, ERR_POISONED_LOCK, MemoryReport};

type Reporter = Arc<dyn Fn() -> usize + Send + Sync>;
type Sweeper = Arc<dyn Fn() -> usize + Send + Sync>;
type Printer = Arc<dyn Fn(&mut MemoryReport) + Send + Sync>;

/// Tracks the memory committed by a set of pools and decides whether they may grow.
///
/// Pools of any item type attach themselves to a coordinator when they are created by
/// registering three callbacks: a reporter of the bytes they have committed, a sweeper that
/// reclaims their unreferenced slots and a printer for diagnostic dumps.
///
/// Before a pool adds a chunk, it asks the coordinator via
/// [`can_request_memory()`][Self::can_request_memory]. If a capacity is configured and total
/// usage has reached the sweep threshold, the coordinator first sweeps **every** attached pool,
/// not only the one asking. It then grants the request only if the new chunk fits within the
/// capacity.
///
/// This type acts as a cloneable handle to shared state. All clones refer to the same
/// coordinator.
///
/// # Example
///
/// ```rust
/// use sweep_pool::{Coordinator, TypedPool};
///
/// let coordinator = Coordinator::builder()
///     .capacity_bytes(4096)
///     .sweep_threshold_percent(50)
///     .build();
///
/// let numbers = TypedPool::<u64>::new(&coordinator);
/// let names = TypedPool::<String>::new(&coordinator);
///
/// let _number = numbers.allocate(1).unwrap();
/// let _name = names.allocate("one".to_string()).unwrap();
///
/// assert_eq!(
///     coordinator.usage_bytes(),
///     numbers.usage_bytes() + names.usage_bytes()
/// );
/// ```
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    capacity_bytes: Option<usize>,
    sweep_threshold_percent: u8,

    reporters: Mutex<Vec<Registration<Reporter>>>,
    sweepers: Mutex<Vec<Registration<Sweeper>>>,
    printers: Mutex<Vec<Registration<Printer>>>,

    /// Held by a growing pool from admission until its new chunk is in place, so no two
    /// growers are admitted against the same usage.
    growth: Mutex<()>,

    next_pool_id: AtomicU64,
}

/// Identifies the callbacks a pool registered, so they can be removed when the pool is dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PoolId(u64);

struct Registration<C> {
    /// `None` for callbacks registered directly, which stay for the life of the coordinator.
    owner: Option<PoolId>,
    callback: C,
}

/// The answer to a request for more memory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Admission {
    Granted,

    Denied {
        usage_bytes: usize,
        capacity_bytes: usize,
    },
}

impl Coordinator {
    /// Creates a coordinator without a capacity, so pools may grow without limit.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`Coordinator`].
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(capacity_bytes: Option<usize>, sweep_threshold_percent: u8) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                capacity_bytes,
                sweep_threshold_percent,
                reporters: Mutex::new(Vec::new()),
                sweepers: Mutex::new(Vec::new()),
                printers: Mutex::new(Vec::new()),
                growth: Mutex::new(()),
                next_pool_id: AtomicU64::new(0),
            }),
        }
    }

    /// The hard limit on memory committed by all attached pools, if any.
    #[must_use]
    pub fn capacity_bytes(&self) -> Option<usize> {
        self.inner.capacity_bytes
    }

    /// Share of the capacity, in percent, at which requests for more memory trigger a sweep of
    /// every attached pool.
    #[must_use]
    pub fn sweep_threshold_percent(&self) -> u8 {
        self.inner.sweep_threshold_percent
    }

    /// Registers a callback that reports how many bytes a pool has committed.
    ///
    /// Callbacks registered this way stay registered for as long as the coordinator exists.
    pub fn register_reporter(&self, reporter: impl Fn() -> usize + Send + Sync + 'static) {
        register(&self.inner.reporters, None, Arc::new(reporter));
    }

    /// Registers a callback that reclaims unreferenced slots of a pool and returns how many
    /// slots it reclaimed.
    ///
    /// Callbacks registered this way stay registered for as long as the coordinator exists.
    pub fn register_sweeper(&self, sweeper: impl Fn() -> usize + Send + Sync + 'static) {
        register(&self.inner.sweepers, None, Arc::new(sweeper));
    }

    /// Registers a callback that appends the slot table of a pool to a diagnostic report.
    ///
    /// Callbacks registered this way stay registered for as long as the coordinator exists.
    pub fn register_printer(&self, printer: impl Fn(&mut MemoryReport) + Send + Sync + 'static) {
        register(&self.inner.printers, None, Arc::new(printer));
    }

    /// Registers the three callbacks of a pool under a new identity that
    /// [`detach_pool()`][Self::detach_pool] removes again.
    pub(crate) fn attach_pool(
        &self,
        reporter: impl Fn() -> usize + Send + Sync + 'static,
        sweeper: impl Fn() -> usize + Send + Sync + 'static,
        printer: impl Fn(&mut MemoryReport) + Send + Sync + 'static,
    ) -> PoolId {
        let id = PoolId(self.inner.next_pool_id.fetch_add(1, Ordering::Relaxed));

        register(&self.inner.reporters, Some(id), Arc::new(reporter));
        register(&self.inner.sweepers, Some(id), Arc::new(sweeper));
        register(&self.inner.printers, Some(id), Arc::new(printer));

        id
    }

    pub(crate) fn detach_pool(&self, id: PoolId) {
        unregister(&self.inner.reporters, id);
        unregister(&self.inner.sweepers, id);
        unregister(&self.inner.printers, id);
    }

    /// Number of pools currently attached to the coordinator.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.inner
            .reporters
            .lock()
            .expect(ERR_POISONED_LOCK)
            .iter()
            .filter(|registration| registration.owner.is_some())
            .count()
    }

    /// Serializes pool growth across every pool of the coordinator. A pool holds the guard from
    /// its admission request until its new chunk is counted in its usage.
    pub(crate) fn lock_growth(&self) -> MutexGuard<'_, ()> {
        self.inner.growth.lock().expect(ERR_POISONED_LOCK)
    }

    /// Total bytes committed by all attached pools.
    #[must_use]
    pub fn usage_bytes(&self) -> usize {
        snapshot(&self.inner.reporters)
            .iter()
            .map(|reporter| reporter())
            .fold(0, usize::saturating_add)
    }

    /// Whether a pool may commit `additional_bytes` more memory.
    ///
    /// Without a capacity this is always `true` and nothing is swept.
    ///
    /// With a capacity, if the current usage has reached the sweep threshold, every attached
    /// pool is swept before answering. Usage is not measured again after the sweep because
    /// sweeping reclaims slots but does not release chunks, so the committed bytes are the same.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sweep_pool::Coordinator;
    ///
    /// let coordinator = Coordinator::builder().capacity_bytes(100).build();
    ///
    /// assert!(coordinator.can_request_memory(100));
    /// assert!(!coordinator.can_request_memory(101));
    /// ```
    #[must_use]
    pub fn can_request_memory(&self, additional_bytes: usize) -> bool {
        self.admit(additional_bytes) == Admission::Granted
    }

    pub(crate) fn admit(&self, additional_bytes: usize) -> Admission {
        let Some(capacity_bytes) = self.inner.capacity_bytes else {
            return Admission::Granted;
        };

        let usage_bytes = self.usage_bytes();

        if self.threshold_reached(usage_bytes, capacity_bytes) {
            let reclaimed = self.sweep_memory();

            debug!(
                usage_bytes,
                capacity_bytes,
                threshold_percent = self.inner.sweep_threshold_percent,
                reclaimed,
                "usage reached sweep threshold, swept all pools"
            );
        }

        let fits = usage_bytes
            .checked_add(additional_bytes)
            .is_some_and(|total| total <= capacity_bytes);

        if fits {
            Admission::Granted
        } else {
            Admission::Denied {
                usage_bytes,
                capacity_bytes,
            }
        }
    }

    fn threshold_reached(&self, usage_bytes: usize, capacity_bytes: usize) -> bool {
        let threshold = usize::from(self.inner.sweep_threshold_percent);

        usage_bytes.saturating_mul(100) >= capacity_bytes.saturating_mul(threshold)
    }

    /// Sweeps every attached pool, returning the total number of slots reclaimed.
    ///
    /// Sweeping returns slots whose reference count is zero to the free sequence of their
    /// chunk. It does not release any memory back to the system.
    pub fn sweep_memory(&self) -> usize {
        snapshot(&self.inner.sweepers)
            .iter()
            .map(|sweeper| sweeper())
            .fold(0, usize::saturating_add)
    }

    /// Collects the slot tables of every attached pool into a report.
    #[must_use]
    pub fn print_memory(&self) -> MemoryReport {
        let mut report = MemoryReport::new();

        for printer in snapshot(&self.inner.printers) {
            printer(&mut report);
        }

        report
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("capacity_bytes", &self.inner.capacity_bytes)
            .field(
                "sweep_threshold_percent",
                &self.inner.sweep_threshold_percent,
            )
            .field("pools", &self.pool_count())
            .finish_non_exhaustive()
    }
}

fn register<F: ?Sized>(
    list: &Mutex<Vec<Registration<Arc<F>>>>,
    owner: Option<PoolId>,
    callback: Arc<F>,
) {
    list.lock()
        .expect(ERR_POISONED_LOCK)
        .push(Registration { owner, callback });
}

fn unregister<C>(list: &Mutex<Vec<Registration<C>>>, id: PoolId) {
    list.lock()
        .expect(ERR_POISONED_LOCK)
        .retain(|registration| registration.owner != Some(id));
}

/// Copies a callback list so the callbacks can run without holding the lock. Callbacks lock
/// their own pool, and a pool may attach or detach itself while another pool is being swept.
fn snapshot<F: ?Sized>(list: &Mutex<Vec<Registration<Arc<F>>>>) -> Vec<Arc<F>> {
    list.lock()
        .expect(ERR_POISONED_LOCK)
        .iter()
        .map(|registration| Arc::clone(&registration.callback))
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{SlotRecord, SlotState};

    assert_impl_all!(Coordinator: Send, Sync, Clone);

    fn printed_record(chunk_index: usize) -> SlotRecord {
        SlotRecord {
            type_name: "u8",
            chunk_index,
            slot_index: 0,
            address: 0,
            count: 0,
            state: SlotState::Free,
        }
    }

    fn counting_sweeper(coordinator: &Coordinator) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        coordinator.register_sweeper(move || {
            calls_clone.fetch_add(1, Ordering::Relaxed);
            0
        });

        calls
    }

    #[test]
    fn usage_sums_reporters() {
        let coordinator = Coordinator::new();

        coordinator.register_reporter(|| 40);
        coordinator.register_reporter(|| 2);

        assert_eq!(coordinator.usage_bytes(), 42);
    }

    #[test]
    fn without_capacity_always_granted_without_sweep() {
        let coordinator = Coordinator::new();
        coordinator.register_reporter(|| usize::MAX);
        let sweeps = counting_sweeper(&coordinator);

        assert!(coordinator.can_request_memory(usize::MAX));
        assert_eq!(sweeps.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn below_threshold_does_not_sweep() {
        let coordinator = Coordinator::builder()
            .capacity_bytes(100)
            .sweep_threshold_percent(50)
            .build();
        coordinator.register_reporter(|| 49);
        let sweeps = counting_sweeper(&coordinator);

        assert!(coordinator.can_request_memory(10));
        assert_eq!(sweeps.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn at_threshold_sweeps_every_pool() {
        let coordinator = Coordinator::builder()
            .capacity_bytes(100)
            .sweep_threshold_percent(50)
            .build();
        coordinator.register_reporter(|| 25);
        coordinator.register_reporter(|| 25);
        let first = counting_sweeper(&coordinator);
        let second = counting_sweeper(&coordinator);

        assert!(coordinator.can_request_memory(10));
        assert_eq!(first.load(Ordering::Relaxed), 1);
        assert_eq!(second.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn denies_beyond_capacity_after_sweeping() {
        let coordinator = Coordinator::builder().capacity_bytes(100).build();
        coordinator.register_reporter(|| 90);
        let sweeps = counting_sweeper(&coordinator);

        assert_eq!(
            coordinator.admit(11),
            Admission::Denied {
                usage_bytes: 90,
                capacity_bytes: 100
            }
        );
        assert_eq!(sweeps.load(Ordering::Relaxed), 1);

        assert_eq!(coordinator.admit(10), Admission::Granted);
    }

    #[test]
    fn zero_threshold_always_sweeps() {
        let coordinator = Coordinator::builder()
            .capacity_bytes(100)
            .sweep_threshold_percent(0)
            .build();
        let sweeps = counting_sweeper(&coordinator);

        assert!(coordinator.can_request_memory(1));
        assert_eq!(sweeps.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn overflowing_request_is_denied() {
        let coordinator = Coordinator::builder().capacity_bytes(usize::MAX).build();
        coordinator.register_reporter(|| 1);

        assert!(!coordinator.can_request_memory(usize::MAX));
    }

    #[test]
    fn sweep_memory_sums_reclaimed() {
        let coordinator = Coordinator::new();
        coordinator.register_sweeper(|| 3);
        coordinator.register_sweeper(|| 4);

        assert_eq!(coordinator.sweep_memory(), 7);
    }

    #[test]
    fn print_memory_runs_every_printer() {
        let coordinator = Coordinator::new();
        for chunk_index in 0..2 {
            coordinator.register_printer(move |report| report.push(printed_record(chunk_index)));
        }

        let report = coordinator.print_memory();

        assert_eq!(report.records().len(), 2);
        assert_eq!(report.records().last().unwrap().chunk_index(), 1);
    }

    #[test]
    fn detached_pool_leaves_no_callbacks_behind() {
        let coordinator = Coordinator::new();
        coordinator.register_reporter(|| 1);

        let first = coordinator.attach_pool(|| 10, || 2, |_| {});
        let second = coordinator.attach_pool(|| 20, || 3, |_| {});

        assert_eq!(coordinator.pool_count(), 2);
        assert_eq!(coordinator.usage_bytes(), 31);

        coordinator.detach_pool(first);

        assert_eq!(coordinator.pool_count(), 1);
        assert_eq!(coordinator.usage_bytes(), 21);
        assert_eq!(coordinator.sweep_memory(), 3);

        coordinator.detach_pool(second);

        assert_eq!(coordinator.pool_count(), 0);
        assert_eq!(coordinator.usage_bytes(), 1);
        assert!(format!("{coordinator:?}").contains("pools: 0"));
    }

    #[test]
    fn clones_share_registrations() {
        let coordinator = Coordinator::new();
        let clone = coordinator.clone();

        clone.register_reporter(|| 8);

        assert_eq!(coordinator.usage_bytes(), 8);
    }
}
