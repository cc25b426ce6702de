use std::{
    alloc::{self, Layout},
    fmt,
    marker::PhantomData,
    ptr::NonNull,
};

use crate::{Backing, Error, MIN_CAPACITY, Result, Slot};

/// Heap-allocated backing grown with `realloc`.
pub struct HeapBacking<T: Slot> {
    buf: NonNull<T>,
    capacity: usize,
    _slot: PhantomData<T>,
}

impl<T: Slot> HeapBacking<T> {
    pub fn new() -> Result<Self> {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// Allocates room for at least `capacity` slots (never below the minimum).
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        const {
            assert!(size_of::<T>() != 0, "zero-sized slots are not supported");
        }
        let capacity = capacity.max(MIN_CAPACITY);
        let layout = Self::layout(capacity)?;
        // SAFETY: the layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let buf = NonNull::new(raw as *mut T).ok_or(Error::AllocationFailed {
            bytes: layout.size(),
        })?;
        Ok(Self {
            buf,
            capacity,
            _slot: PhantomData,
        })
    }

    #[inline]
    fn layout(capacity: usize) -> Result<Layout> {
        Layout::array::<T>(capacity).map_err(|_| Error::AllocationFailed {
            bytes: capacity.saturating_mul(size_of::<T>()),
        })
    }
}

impl<T: Slot> Backing<T> for HeapBacking<T> {
    #[inline(always)]
    fn ptr(&self) -> *mut T {
        self.buf.as_ptr()
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn grow_to(&mut self, wanted: usize) -> Result<()> {
        if wanted <= self.capacity {
            return Ok(());
        }
        let old_layout = Self::layout(self.capacity)?;
        let new_layout = Self::layout(wanted)?;
        // SAFETY: `buf` was allocated with `old_layout`; realloc keeps the
        // leading bytes even when the block moves. On failure the old block
        // stays valid and untouched.
        let raw =
            unsafe { alloc::realloc(self.buf.as_ptr() as *mut u8, old_layout, new_layout.size()) };
        self.buf = NonNull::new(raw as *mut T).ok_or(Error::AllocationFailed {
            bytes: new_layout.size(),
        })?;
        self.capacity = wanted;
        Ok(())
    }
}

impl<T: Slot> Drop for HeapBacking<T> {
    fn drop(&mut self) {
        if let Ok(layout) = Self::layout(self.capacity) {
            // SAFETY: `buf` was allocated with this exact layout.
            unsafe { alloc::dealloc(self.buf.as_ptr() as *mut u8, layout) };
        }
    }
}

// SAFETY: the backing exclusively owns its buffer and `T` is Send + Sync.
unsafe impl<T: Slot> Send for HeapBacking<T> {}
unsafe impl<T: Slot> Sync for HeapBacking<T> {}

impl<T: Slot> fmt::Debug for HeapBacking<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapBacking")
            .field("capacity", &self.capacity)
            .finish()
    }
}
