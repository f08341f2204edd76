use std::any::type_name;
use std::cell::UnsafeCell;
use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Upper bound on the reference count of a single slot. Going beyond this means handles are
/// being leaked in a loop, so we refuse to continue rather than risk wrapping around to zero.
const MAX_REFERENCE_COUNT: usize = isize::MAX.unsigned_abs();

/// The fixed-population slot storage of one chunk.
///
/// Each slot holds at most one object and a count of the handles referencing it. Object storage
/// is created on the first use of a slot and then overwritten in place on every reuse. It is only
/// released when the slot array itself is dropped, which happens once the owning chunk and every
/// handle pointing into the array are gone.
///
/// The array does not know which of its slots are free. That bookkeeping belongs to the
/// [`Chunk`][crate::Chunk], which is the only party allowed to store values. Handles only ever
/// adjust counts and read values of slots they hold a count on.
pub(crate) struct SlotArray<T> {
    slots: Box<[Slot<T>]>,
}

struct Slot<T> {
    value: UnsafeCell<Option<T>>,
    count: AtomicUsize,
}

impl<T> SlotArray<T> {
    #[must_use]
    pub(crate) fn new(population: NonZero<usize>) -> Self {
        let slots = (0..population.get())
            .map(|_| Slot {
                value: UnsafeCell::new(None),
                count: AtomicUsize::new(0),
            })
            .collect();

        Self { slots }
    }

    #[must_use]
    pub(crate) fn population(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: usize) -> &Slot<T> {
        self.slots.get(index).unwrap_or_else(|| {
            panic!(
                "slot {index} index out of bounds in slot array of {} with population {}",
                type_name::<T>(),
                self.slots.len()
            )
        })
    }

    /// Current number of handles referencing the slot.
    #[must_use]
    pub(crate) fn count(&self, index: usize) -> usize {
        // Acquire pairs with the Release in `adjust()` so that a sweep observing zero also
        // observes every access the last handle made before it was dropped.
        self.slot(index).count.load(Ordering::Acquire)
    }

    /// Adjusts the reference count of a slot by a signed delta, returning the new count.
    ///
    /// # Panics
    ///
    /// Panics if the count would drop below zero or exceed the maximum reference count.
    pub(crate) fn adjust(&self, index: usize, delta: isize) -> usize {
        let count = &self.slot(index).count;
        let magnitude = delta.unsigned_abs();

        if delta >= 0 {
            // Taking an additional reference requires an existing one, so there is nothing
            // new to synchronize with here.
            let previous = count.fetch_add(magnitude, Ordering::Relaxed);

            previous
                .checked_add(magnitude)
                .filter(|updated| *updated <= MAX_REFERENCE_COUNT)
                .unwrap_or_else(|| {
                    panic!(
                        "reference count overflow on slot {index} in slot array of {}",
                        type_name::<T>()
                    )
                })
        } else {
            let previous = count.fetch_sub(magnitude, Ordering::Release);

            previous.checked_sub(magnitude).unwrap_or_else(|| {
                panic!(
                    "reference count underflow on slot {index} in slot array of {}",
                    type_name::<T>()
                )
            })
        }
    }

    /// Stores a value in a slot and sets its reference count to one.
    ///
    /// If the slot already holds storage from an earlier use, the new value is assigned into it
    /// (dropping the old value). Otherwise the storage is created. Returns whether existing
    /// storage was reused.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that nothing references the slot: its count is zero and no
    /// other thread is storing into it concurrently.
    pub(crate) unsafe fn store(&self, index: usize, value: T) -> bool {
        let slot = self.slot(index);

        debug_assert_eq!(
            slot.count.load(Ordering::Acquire),
            0,
            "storing into slot {index} that is still referenced in slot array of {}",
            type_name::<T>()
        );

        // SAFETY: The caller guarantees that no handle references this slot and that nobody
        // else is storing into it, so we have exclusive access to the storage.
        let storage = unsafe { &mut *slot.value.get() };

        let reused = if let Some(existing) = storage.as_mut() {
            *existing = value;
            true
        } else {
            *storage = Some(value);
            false
        };

        slot.count.store(1, Ordering::Release);

        reused
    }

    /// # Safety
    ///
    /// The caller must hold a reference count on the slot for as long as the returned
    /// reference is alive.
    ///
    /// # Panics
    ///
    /// Panics if the slot has never been stored into.
    #[must_use]
    pub(crate) unsafe fn get(&self, index: usize) -> &T {
        // SAFETY: A slot with a non-zero count is never swept, so it is never stored into while
        // the caller holds its count. Shared access is all we hand out.
        let storage = unsafe { &*self.slot(index).value.get() };

        storage.as_ref().unwrap_or_else(|| {
            panic!(
                "slot {index} has never held a value in slot array of {}",
                type_name::<T>()
            )
        })
    }

    /// Address of the storage of a slot, for diagnostics only.
    #[must_use]
    pub(crate) fn address(&self, index: usize) -> usize {
        NonNull::new(self.slot(index).value.get())
            .expect("UnsafeCell::get never returns null")
            .addr()
            .get()
    }
}

impl<T> fmt::Debug for SlotArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("population", &self.slots.len())
            .finish_non_exhaustive()
    }
}

// SAFETY: Values can be stored by one thread and later overwritten or dropped by another,
// which requires T: Send. Handles on different threads read the same value through shared
// references, which requires T: Sync. Counts are atomic.
unsafe impl<T: Send + Sync> Sync for SlotArray<T> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    fn population(value: usize) -> NonZero<usize> {
        NonZero::new(value).unwrap()
    }

    #[test]
    fn starts_empty_with_zero_counts() {
        let slots = SlotArray::<u32>::new(population(3));

        assert_eq!(slots.population(), 3);
        assert_eq!(slots.count(0), 0);
        assert_eq!(slots.count(2), 0);
    }

    #[test]
    fn store_sets_count_to_one() {
        let slots = SlotArray::<u32>::new(population(2));

        let reused = unsafe { slots.store(1, 42) };

        assert!(!reused);
        assert_eq!(slots.count(1), 1);
        assert_eq!(unsafe { *slots.get(1) }, 42);
    }

    #[test]
    fn adjust_moves_count_both_ways() {
        let slots = SlotArray::<u32>::new(population(1));
        unsafe { slots.store(0, 7) };

        assert_eq!(slots.adjust(0, 1), 2);
        assert_eq!(slots.adjust(0, 2), 4);
        assert_eq!(slots.adjust(0, -3), 1);
        assert_eq!(slots.adjust(0, -1), 0);
        assert_eq!(slots.count(0), 0);
    }

    #[test]
    #[should_panic]
    fn adjust_below_zero_panics() {
        let slots = SlotArray::<u32>::new(population(1));

        slots.adjust(0, -1);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_panics() {
        let slots = SlotArray::<u32>::new(population(1));

        _ = slots.count(1);
    }

    #[test]
    #[should_panic]
    fn get_never_stored_panics() {
        let slots = SlotArray::<u32>::new(population(1));

        _ = unsafe { slots.get(0) };
    }

    #[test]
    fn reuse_assigns_in_place_and_drops_old_value() {
        struct Tracked {
            drops: Rc<Cell<usize>>,
            id: u32,
        }

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.drops.set(self.drops.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let slots = SlotArray::<Tracked>::new(population(1));

        let reused = unsafe {
            slots.store(
                0,
                Tracked {
                    drops: Rc::clone(&drops),
                    id: 1,
                },
            )
        };
        assert!(!reused);

        let address_before = slots.address(0);
        slots.adjust(0, -1);

        let reused = unsafe {
            slots.store(
                0,
                Tracked {
                    drops: Rc::clone(&drops),
                    id: 2,
                },
            )
        };

        assert!(reused);
        assert_eq!(slots.address(0), address_before);
        assert_eq!(drops.get(), 1);
        assert_eq!(unsafe { slots.get(0) }.id, 2);

        drop(slots);
        assert_eq!(drops.get(), 2);
    }
}
