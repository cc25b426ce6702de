use std::{fmt, marker::PhantomData};

use log::debug;
#[cfg(target_os = "linux")]
use memmap2::RemapOptions;
use memmap2::MmapMut;

use crate::{Backing, Error, MIN_CAPACITY, PAGE_SIZE, Result, Slot, byte_len};

/// Private anonymous mapping backing.
///
/// Starts with one page's worth of slots. Growth prefers `mremap` where the
/// platform has it and falls back to mapping a fresh region and copying.
pub struct AnonBacking<T: Slot> {
    map: MmapMut,
    capacity: usize,
    _slot: PhantomData<T>,
}

impl<T: Slot> AnonBacking<T> {
    pub fn new() -> Result<Self> {
        Self::with_capacity(Self::initial_capacity())
    }

    /// Maps room for at least `capacity` slots (never below a page's worth).
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        const {
            assert!(size_of::<T>() != 0, "zero-sized slots are not supported");
            assert!(align_of::<T>() <= PAGE_SIZE, "slot alignment exceeds the page size");
        }
        let capacity = capacity.max(Self::initial_capacity());
        let map = MmapMut::map_anon(byte_len::<T>(capacity)?).map_err(Error::io("mmap"))?;
        Ok(Self {
            map,
            capacity,
            _slot: PhantomData,
        })
    }

    /// One page's worth of slots, never below [`MIN_CAPACITY`].
    #[inline]
    pub fn initial_capacity() -> usize {
        (PAGE_SIZE / size_of::<T>()).max(MIN_CAPACITY)
    }
}

impl<T: Slot> Backing<T> for AnonBacking<T> {
    #[inline(always)]
    fn ptr(&self) -> *mut T {
        self.map.as_ptr() as *mut T
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn grow_to(&mut self, wanted: usize) -> Result<()> {
        if wanted <= self.capacity {
            return Ok(());
        }
        let new_len = byte_len::<T>(wanted)?;

        #[cfg(target_os = "linux")]
        // SAFETY: no reference into the mapping is live across this call; the
        // owner re-reads `ptr()` after every grow.
        unsafe {
            self.map
                .remap(new_len, RemapOptions::new().may_move(true))
                .map_err(Error::io("mremap"))?;
        }

        #[cfg(not(target_os = "linux"))]
        {
            let mut next = MmapMut::map_anon(new_len).map_err(Error::io("mmap"))?;
            let old_len = byte_len::<T>(self.capacity)?;
            next[..old_len].copy_from_slice(&self.map[..old_len]);
            self.map = next;
        }

        debug!("anon backing grown to {wanted} slots");
        self.capacity = wanted;
        Ok(())
    }
}

impl<T: Slot> fmt::Debug for AnonBacking<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnonBacking")
            .field("capacity", &self.capacity)
            .finish()
    }
}
