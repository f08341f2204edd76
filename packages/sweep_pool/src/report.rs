//! Diagnostic dumps of pool slot tables.

use std::fmt;

/// A snapshot of the slot tables of every pool attached to a [`Coordinator`][crate::Coordinator].
///
/// Produced by [`Coordinator::print_memory()`][crate::Coordinator::print_memory] and
/// [`print_memory()`][crate::print_memory]. This is meant for operational inspection only; the
/// values may be outdated as soon as the report is created.
///
/// # Examples
///
/// ```
/// use sweep_pool::{Coordinator, TypedPool};
///
/// let coordinator = Coordinator::new();
/// let pool = TypedPool::<u32>::new(&coordinator);
/// let _handle = pool.allocate(5).unwrap();
///
/// let report = coordinator.print_memory();
/// assert_eq!(report.records().len(), pool.capacity());
///
/// report.print_to_stdout();
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryReport {
    records: Vec<SlotRecord>,
}

/// One slot in a [`MemoryReport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotRecord {
    pub(crate) type_name: &'static str,
    pub(crate) chunk_index: usize,
    pub(crate) slot_index: usize,
    pub(crate) address: usize,
    pub(crate) count: usize,
    pub(crate) state: SlotState,
}

/// Whether a slot is available for allocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SlotState {
    /// The slot is in the free sequence of its chunk and will be handed out by a future
    /// allocation.
    Free,

    /// The slot was allocated and has not been reclaimed by a sweep yet. Its reference count
    /// may already be zero.
    Managed,
}

impl MemoryReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: SlotRecord) {
        self.records.push(record);
    }

    /// The recorded slots, grouped by pool in registration order and ordered by chunk and slot
    /// index within each pool.
    #[must_use]
    pub fn records(&self) -> &[SlotRecord] {
        &self.records
    }

    /// Number of recorded slots in the [`SlotState::Managed`] state.
    #[must_use]
    pub fn managed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.state == SlotState::Managed)
            .count()
    }

    /// Prints the report to stdout, one line per slot.
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    pub fn print_to_stdout(&self) {
        print!("{self}");
    }
}

impl SlotRecord {
    /// Name of the item type of the pool the slot belongs to.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Position of the slot's chunk in its pool.
    #[must_use]
    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    /// Position of the slot in its chunk.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    /// Memory address of the slot's storage.
    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Number of handles referencing the slot.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the slot is free or managed.
    #[must_use]
    pub fn state(&self) -> SlotState {
        self.state
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Managed => write!(f, "managed"),
        }
    }
}

impl fmt::Display for SlotRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}:{}] {:#x} count={} {}",
            self.type_name, self.chunk_index, self.slot_index, self.address, self.count, self.state
        )
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return writeln!(f, "No pooled memory.");
        }

        for record in &self.records {
            writeln!(f, "{record}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(MemoryReport: Send, Sync);

    fn record(slot_index: usize, state: SlotState) -> SlotRecord {
        SlotRecord {
            type_name: "u32",
            chunk_index: 1,
            slot_index,
            address: 0x1000,
            count: usize::from(state == SlotState::Managed),
            state,
        }
    }

    #[test]
    fn empty_report_says_so() {
        let report = MemoryReport::new();

        assert!(report.records().is_empty());
        assert_eq!(report.to_string(), "No pooled memory.\n");
    }

    #[test]
    fn display_lists_each_slot() {
        let mut report = MemoryReport::new();
        report.push(record(0, SlotState::Managed));
        report.push(record(1, SlotState::Free));

        assert_eq!(report.managed_count(), 1);
        assert_eq!(
            report.to_string(),
            "u32 [1:0] 0x1000 count=1 managed\nu32 [1:1] 0x1000 count=0 free\n"
        );
    }
}
