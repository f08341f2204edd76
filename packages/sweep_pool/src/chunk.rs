use std::any::type_name;
use std::collections::VecDeque;
use std::num::NonZero;
use std::sync::Arc;

use crate::{MemoryReport, SlotArray, SlotRecord, SlotState};

/// One segment of a [`TypedPool`][crate::TypedPool]: a fixed-population slot array plus the
/// bookkeeping of which slots are free and which are managed (allocated).
///
/// Every slot index is in exactly one of the two sequences. Slots leave the free sequence in
/// FIFO order when allocated. They only return to it through [`sweep()`][Self::sweep], never
/// when their reference count drops to zero.
///
/// The slot array is shared with the handles pointing into it, so its storage outlives the
/// chunk if handles are still around when the chunk is dropped.
#[derive(Debug)]
pub(crate) struct Chunk<T> {
    slots: Arc<SlotArray<T>>,

    /// Indexes of slots that may be allocated, in the order they become available.
    free: VecDeque<usize>,

    /// Indexes of slots that have been allocated and not yet reclaimed by a sweep.
    managed: Vec<usize>,
}

/// Outcome of placing a value into a chunk.
#[derive(Debug)]
pub(crate) enum Placement<T> {
    Placed(SlotRef<T>),

    /// The chunk had no free slot. The value is handed back so the caller can try elsewhere.
    Full(T),
}

/// A freshly allocated slot with its reference count set to one.
///
/// This is the raw material for a [`Handle`][crate::Handle], which takes over the count.
#[derive(Debug)]
pub(crate) struct SlotRef<T> {
    slots: Arc<SlotArray<T>>,
    index: usize,
    reused: bool,
}

impl<T> SlotRef<T> {
    #[must_use]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub(crate) fn count(&self) -> usize {
        self.slots.count(self.index)
    }

    /// Whether the slot already held storage from an earlier allocation.
    #[must_use]
    pub(crate) fn reused(&self) -> bool {
        self.reused
    }

    #[must_use]
    pub(crate) fn into_parts(self) -> (Arc<SlotArray<T>>, usize) {
        (self.slots, self.index)
    }
}

impl<T> Chunk<T> {
    #[must_use]
    pub(crate) fn new(population: NonZero<usize>) -> Self {
        Self {
            slots: Arc::new(SlotArray::new(population)),
            free: (0..population.get()).collect(),
            managed: Vec::with_capacity(population.get()),
        }
    }

    #[must_use]
    pub(crate) fn population(&self) -> usize {
        self.slots.population()
    }

    /// Number of managed slots, including those whose count already dropped to zero but
    /// which have not been swept yet.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn len(&self) -> usize {
        self.managed.len()
    }

    /// Number of free slots.
    #[must_use]
    pub(crate) fn vacant(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.managed.is_empty()
    }

    #[must_use]
    pub(crate) fn is_full(&self) -> bool {
        self.managed.len() == self.population()
    }

    /// Places a value into the slot at the head of the free sequence.
    pub(crate) fn allocate(&mut self, value: T) -> Placement<T> {
        let Some(index) = self.free.pop_front() else {
            return Placement::Full(value);
        };

        // SAFETY: Slots in the free sequence have a zero count and a count can only be raised
        // through an existing handle, so nothing references this slot. We hold `&mut self`,
        // which rules out a concurrent store into the same slot array.
        let reused = unsafe { self.slots.store(index, value) };

        self.managed.push(index);

        #[cfg(debug_assertions)]
        self.integrity_check();

        Placement::Placed(SlotRef {
            slots: Arc::clone(&self.slots),
            index,
            reused,
        })
    }

    /// Moves every managed slot whose count is exactly zero back to the free sequence.
    ///
    /// Returns the number of slots reclaimed.
    pub(crate) fn sweep(&mut self) -> usize {
        let slots = &self.slots;
        let free = &mut self.free;
        let free_before = free.len();

        self.managed.retain(|&index| {
            if slots.count(index) == 0 {
                free.push_back(index);
                false
            } else {
                true
            }
        });

        #[cfg(debug_assertions)]
        self.integrity_check();

        self.free
            .len()
            .checked_sub(free_before)
            .expect("sweeping only ever adds to the free sequence")
    }

    /// Appends one diagnostic record per slot to the report.
    pub(crate) fn dump(&self, chunk_index: usize, report: &mut MemoryReport) {
        let mut is_managed = vec![false; self.population()];

        for &index in &self.managed {
            if let Some(flag) = is_managed.get_mut(index) {
                *flag = true;
            }
        }

        for (index, managed) in is_managed.into_iter().enumerate() {
            report.push(SlotRecord {
                type_name: type_name::<T>(),
                chunk_index,
                slot_index: index,
                address: self.slots.address(index),
                count: self.slots.count(index),
                state: if managed {
                    SlotState::Managed
                } else {
                    SlotState::Free
                },
            });
        }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        let population = self.population();
        let mut seen = vec![false; population];

        for &index in self.free.iter().chain(&self.managed) {
            let flag = seen.get_mut(index).unwrap_or_else(|| {
                panic!(
                    "slot index {index} is out of bounds of population {population} in chunk of {}",
                    type_name::<T>()
                )
            });

            assert!(
                !*flag,
                "slot index {index} is tracked more than once in chunk of {}",
                type_name::<T>()
            );

            *flag = true;
        }

        assert!(
            seen.iter().all(|flag| *flag),
            "some slots are neither free nor managed in chunk of {}",
            type_name::<T>()
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn chunk_of<T>(population: usize) -> Chunk<T> {
        Chunk::new(NonZero::new(population).unwrap())
    }

    fn placed<T>(placement: Placement<T>) -> SlotRef<T> {
        match placement {
            Placement::Placed(slot) => slot,
            Placement::Full(_) => panic!("expected the value to be placed"),
        }
    }

    fn release<T>(slot: SlotRef<T>) {
        let (slots, index) = slot.into_parts();
        slots.adjust(index, -1);
    }

    #[test]
    fn smoke_test() {
        let mut chunk = chunk_of::<u32>(3);

        assert!(chunk.is_empty());
        assert_eq!(chunk.population(), 3);
        assert_eq!(chunk.vacant(), 3);

        let a = placed(chunk.allocate(1));
        let b = placed(chunk.allocate(2));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(a.count(), 1);
        assert!(!a.reused());
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.vacant(), 1);
        assert!(!chunk.is_full());
        assert!(!chunk.is_empty());
    }

    #[test]
    fn full_chunk_hands_value_back() {
        let mut chunk = chunk_of::<u32>(2);

        _ = placed(chunk.allocate(1));
        _ = placed(chunk.allocate(2));
        assert!(chunk.is_full());

        match chunk.allocate(3) {
            Placement::Full(value) => assert_eq!(value, 3),
            Placement::Placed(_) => panic!("a full chunk must not place a value"),
        }
    }

    #[test]
    fn zero_count_slot_stays_managed_until_swept() {
        let mut chunk = chunk_of::<u32>(2);

        let a = placed(chunk.allocate(1));
        let index = a.index();
        release(a);

        assert!(chunk.managed.contains(&index));
        assert!(!chunk.free.contains(&index));

        assert_eq!(chunk.sweep(), 1);

        assert!(!chunk.managed.contains(&index));
        assert!(chunk.free.contains(&index));
        assert!(chunk.is_empty());
    }

    #[test]
    fn sweep_leaves_referenced_slots_alone() {
        let mut chunk = chunk_of::<u32>(3);

        let a = placed(chunk.allocate(1));
        let b = placed(chunk.allocate(2));

        // Two references to `a`, one of which goes away again.
        let (a_slots, a_index) = a.into_parts();
        a_slots.adjust(a_index, 1);
        a_slots.adjust(a_index, -1);
        release(b);

        assert_eq!(chunk.sweep(), 1);
        assert_eq!(chunk.len(), 1);
        assert_eq!(a_slots.count(a_index), 1);

        // Nothing left to reclaim on a second pass.
        assert_eq!(chunk.sweep(), 0);
    }

    #[test]
    fn reclaimed_slots_are_reused_in_fifo_order() {
        let mut chunk = chunk_of::<u32>(3);

        let a = placed(chunk.allocate(1));
        let b = placed(chunk.allocate(2));
        let c = placed(chunk.allocate(3));

        release(c);
        release(a);
        release(b);
        assert_eq!(chunk.sweep(), 3);

        // Swept slots join the free sequence in managed order: 0, 1, 2.
        let d = placed(chunk.allocate(4));
        let e = placed(chunk.allocate(5));

        assert_eq!(d.index(), 0);
        assert_eq!(e.index(), 1);
        assert!(d.reused());
        assert!(e.reused());
    }

    #[test]
    fn dump_reports_every_slot() {
        let mut chunk = chunk_of::<u64>(3);

        let a = placed(chunk.allocate(10));
        let mut report = MemoryReport::new();

        chunk.dump(4, &mut report);

        let records = report.records();
        assert_eq!(records.len(), 3);

        let first = records.first().unwrap();
        assert_eq!(first.chunk_index, 4);
        assert_eq!(first.slot_index, 0);
        assert_eq!(first.count, 1);
        assert_eq!(first.state, SlotState::Managed);
        assert_eq!(first.type_name, "u64");

        let last = records.last().unwrap();
        assert_eq!(last.count, 0);
        assert_eq!(last.state, SlotState::Free);

        release(a);
    }

    #[test]
    fn value_outlives_chunk_while_referenced() {
        let mut chunk = chunk_of::<String>(1);

        let a = placed(chunk.allocate("still here".to_string()));
        drop(chunk);

        let (slots, index) = a.into_parts();

        // SAFETY: We still hold the count taken by the allocation.
        let value = unsafe { slots.get(index) };
        assert_eq!(value, "still here");
    }
}
