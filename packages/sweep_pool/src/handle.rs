use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::{SlotArray, SlotRef};

/// A reference-counted handle to an object allocated from a [`TypedPool`][crate::TypedPool].
///
/// Cloning a handle increments the reference count of its slot and dropping a handle decrements
/// it. Moving a handle leaves the count untouched. When the count reaches zero the object is
/// **not** dropped and its slot is not freed; the slot is only reclaimed by the next sweep of the
/// pool, at which point the object will be overwritten by a future allocation.
///
/// A handle keeps the slot storage of its chunk alive, so it remains valid even if the pool
/// itself is dropped.
///
/// # Example
///
/// ```rust
/// use sweep_pool::{Coordinator, Handle, TypedPool};
///
/// let coordinator = Coordinator::new();
/// let pool = TypedPool::<String>::new(&coordinator);
///
/// let handle = pool.allocate("hello".to_string()).unwrap();
/// let alias = handle.clone();
/// assert_eq!(Handle::reference_count(&handle), 2);
///
/// drop(handle);
/// assert_eq!(*alias, "hello");
/// assert_eq!(Handle::reference_count(&alias), 1);
/// ```
pub struct Handle<T> {
    slots: Arc<SlotArray<T>>,
    index: usize,
}

impl<T> Handle<T> {
    /// Takes over the reference count of a freshly allocated slot.
    #[must_use]
    pub(crate) fn from_slot(slot: SlotRef<T>) -> Self {
        let (slots, index) = slot.into_parts();

        Self { slots, index }
    }

    /// Returns a pointer to the object.
    ///
    /// The pointer is valid for reads for as long as any handle to the object exists.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> NonNull<T> {
        NonNull::from(&**self)
    }

    /// Number of handles currently referencing the same object, including this one.
    ///
    /// This is an associated function to avoid conflicts with methods of `T`.
    #[must_use]
    pub fn reference_count(handle: &Self) -> usize {
        handle.slots.count(handle.index)
    }

    /// Whether two handles reference the same slot.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.slots, &b.slots) && a.index == b.index
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        self.slots.adjust(self.index, 1);

        Self {
            slots: Arc::clone(&self.slots),
            index: self.index,
        }
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        // The slot stays managed until a sweep observes the zero count.
        self.slots.adjust(self.index, -1);
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: This handle holds a count on the slot for its entire lifetime, so the slot
        // cannot be swept and overwritten while the returned reference is alive.
        unsafe { self.slots.get(self.index) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("value", &**self)
            .field("index", &self.index)
            .field("reference_count", &Self::reference_count(self))
            .finish()
    }
}
