use crate::{Error, MIN_CAPACITY, Result, Slot};

/// Backing storage strategy for a contiguous buffer of slots.
///
/// A backing owns exactly one allocation, addressable as an array of `T`
/// spanning `capacity()` slots. Growing may move the buffer, so callers must
/// re-read `ptr()` after every `grow_to`.
pub trait Backing<T: Slot> {
    /// Pointer to the first slot. Valid for reads and writes across the whole
    /// capacity until the next grow or drop.
    fn ptr(&self) -> *mut T;

    /// Current capacity in slots.
    fn capacity(&self) -> usize;

    /// Slots a previous incarnation left behind. Zero for backings without
    /// persistent storage.
    #[inline]
    fn backing_len(&self) -> usize {
        0
    }

    /// Ensures `capacity() >= wanted`, preserving the bytes of the first
    /// `min(old_capacity, wanted)` slots.
    ///
    /// For the heap and anonymous backings a `wanted` at or below the current
    /// capacity is a no-op. The file backing instead resizes to `wanted`
    /// exactly (floored at [`MIN_CAPACITY`]), since its file must always span
    /// the capacity; that is what lets it hand space back.
    fn grow_to(&mut self, wanted: usize) -> Result<()>;

    /// Records the live slot count ahead of drop. Only the file backing cares;
    /// it trims its file to this count when it closes.
    #[inline]
    fn sync(&mut self, used: usize) {
        let _ = used;
    }
}

/// Capacity to grow a buffer to for a demand of `needed` slots.
///
/// Small buffers jump straight to [`MIN_CAPACITY`]; everything else doubles
/// from the current capacity until the demand fits.
pub fn grown_capacity(current: usize, needed: usize) -> usize {
    let mut capacity = if current <= 8 { MIN_CAPACITY } else { current };
    while capacity < needed {
        capacity = match capacity.checked_mul(2) {
            Some(doubled) => doubled,
            None => return needed,
        };
    }
    capacity
}

/// Byte length of `slots` slots of `T`, guarding against overflow.
#[inline]
pub(crate) fn byte_len<T>(slots: usize) -> Result<usize> {
    slots
        .checked_mul(size_of::<T>())
        .ok_or(Error::AllocationFailed { bytes: usize::MAX })
}
