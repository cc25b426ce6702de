use std::{
    cell::UnsafeCell,
    fmt, hint,
    marker::PhantomData,
    mem::ManuallyDrop,
    ptr, slice,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use log::debug;
use parking_lot::Mutex;
use rawbuf::{
    AnonBacking, Backing, FileBacking, HeapBacking, Slot, grown_capacity, likely, unlikely,
};

use crate::{Error, MapVec, Result};

/// Spins on a stale capacity this many times before falling back to the grow
/// lock. The lock path re-checks, so falling through early is only ever slower,
/// never wrong.
const SPIN_LIMIT: usize = 1 << 10;

/// Many-writer append-only vector.
///
/// Each writer claims a distinct index with one atomic increment and stores
/// its element without locking. A reservation at or beyond the published
/// capacity diverts the writer to the slow path: demand is recorded in a
/// high-water mark, and a single resizer takes the grow lock, zeroes the
/// published capacity so every writer backs off, waits for in-flight writers
/// to drain, grows the backing and publishes the new capacity. Writers store
/// only while they observe their index below a non-zero published capacity
/// with their in-flight mark set, which is what makes a remap that moves the
/// buffer safe.
///
/// Appends are the only concurrent mutation. Everything that needs an
/// authoritative count (pop, clear, resize, checked reads) answers
/// [`Error::SerialOnly`]; convert back with [`ConcurrentVec::into_serial`]
/// once all writers have joined.
///
/// Readers running alongside writers get no ordering guarantees: an index
/// below `len()` has been reserved, but its value may still be in flight on
/// another thread.
#[must_use = "dropping the vector syncs and releases its backing"]
pub struct ConcurrentVec<T: Slot, B: Backing<T>> {
    backing: UnsafeCell<B>,
    /// Next index to hand out; the element count once writers are quiescent.
    len: AtomicUsize,
    /// Capacity writers are allowed to store under.
    published_cap: AtomicUsize,
    /// High-water mark of reservations that overflowed the capacity.
    wanted_cap: AtomicUsize,
    /// Writers currently inside the reserve-to-store window.
    in_flight: AtomicUsize,
    grow_lock: Mutex<()>,
    poisoned: AtomicBool,
    _slot: PhantomData<T>,
}

// SAFETY: the backing is only mutated by the single resizer while writers are
// drained; writers store to disjoint reserved slots.
unsafe impl<T: Slot, B: Backing<T> + Send> Send for ConcurrentVec<T, B> {}
unsafe impl<T: Slot, B: Backing<T> + Send> Sync for ConcurrentVec<T, B> {}

impl<T: Slot> ConcurrentVec<T, HeapBacking<T>> {
    pub fn new() -> Result<Self> {
        Ok(Self::from_backing(HeapBacking::new()?))
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self::from_backing(HeapBacking::with_capacity(capacity)?))
    }
}

impl<T: Slot> ConcurrentVec<T, AnonBacking<T>> {
    pub fn new() -> Result<Self> {
        Ok(Self::from_backing(AnonBacking::new()?))
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self::from_backing(AnonBacking::with_capacity(capacity)?))
    }
}

impl<T: Slot> ConcurrentVec<T, FileBacking<T>> {
    /// Opens or creates a file-backed vector at `path`, resuming any elements
    /// the file already holds.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::from_backing(FileBacking::open(path)?))
    }
}

impl<T: Slot, B: Backing<T>> ConcurrentVec<T, B> {
    /// Wraps an already-constructed backing, resuming its stored elements.
    pub fn from_backing(backing: B) -> Self {
        let len = backing.backing_len();
        Self::from_parts(backing, len)
    }

    pub(crate) fn from_parts(backing: B, len: usize) -> Self {
        let capacity = backing.capacity();
        Self {
            backing: UnsafeCell::new(backing),
            len: AtomicUsize::new(len),
            published_cap: AtomicUsize::new(capacity),
            wanted_cap: AtomicUsize::new(capacity),
            in_flight: AtomicUsize::new(0),
            grow_lock: Mutex::new(()),
            poisoned: AtomicBool::new(false),
            _slot: PhantomData,
        }
    }

    /// Number of reserved slots. Exact once all writers have joined; while
    /// they run it only promises that indices below it have been handed out,
    /// and it can momentarily read low while a grow has the gate closed.
    #[inline]
    pub fn len(&self) -> usize {
        // Clamped so a burst of reservations mid-grow never exposes slots
        // beyond the mapped capacity.
        self.len
            .load(Ordering::SeqCst)
            .min(self.published_cap.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity as last published; zero while a resizer has the gate closed.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.published_cap.load(Ordering::SeqCst)
    }

    #[inline(always)]
    fn buf(&self) -> *mut T {
        // SAFETY: only dereferenced by writers holding an in-flight
        // reservation below the published capacity, which excludes the
        // resizer, or through exclusive access.
        unsafe { (*self.backing.get()).ptr() }
    }

    /// Appends `value`. Lock-free while the reservation fits the published
    /// capacity.
    pub fn push(&self, value: T) -> Result<()> {
        let mut reserved = None;
        loop {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let i = *reserved.get_or_insert_with(|| self.len.fetch_add(1, Ordering::Relaxed));
            let cap = self.published_cap.load(Ordering::SeqCst);
            if likely(i < cap) {
                // SAFETY: the index is uniquely ours and below a capacity
                // observed while counted in flight. The resizer zeroes the
                // published capacity before draining the counter, so a
                // non-zero observation here proves no remap is running.
                unsafe { self.buf().add(i).write(value) };
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Ok(());
            }
            self.wanted_cap.fetch_max(i + 1, Ordering::SeqCst);
            let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if prev > 1 && self.spin_for(i)? {
                continue;
            }
            self.grow(i)?;
        }
    }

    /// Appends all of `values` as one contiguous run, returning the index of
    /// its first element.
    pub fn push_slice(&self, values: &[T]) -> Result<usize> {
        if values.is_empty() {
            return Ok(self.len());
        }
        let n = values.len();
        let mut reserved = None;
        loop {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let start = *reserved.get_or_insert_with(|| self.len.fetch_add(n, Ordering::Relaxed));
            let last = start + n - 1;
            let cap = self.published_cap.load(Ordering::SeqCst);
            if likely(last < cap) {
                // SAFETY: the run [start, start + n) is uniquely ours and
                // below the observed capacity; see `push`.
                unsafe { ptr::copy_nonoverlapping(values.as_ptr(), self.buf().add(start), n) };
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Ok(start);
            }
            self.wanted_cap.fetch_max(last + 1, Ordering::SeqCst);
            let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if prev > 1 && self.spin_for(last)? {
                continue;
            }
            self.grow(last)?;
        }
    }

    /// Waits for another writer's grow to cover `last`. Returns false when the
    /// spin budget runs out and this writer should take the lock itself.
    fn spin_for(&self, last: usize) -> Result<bool> {
        for _ in 0..SPIN_LIMIT {
            if unlikely(self.poisoned.load(Ordering::SeqCst)) {
                return Err(Error::Poisoned);
            }
            if self.published_cap.load(Ordering::SeqCst) > last {
                return Ok(true);
            }
            hint::spin_loop();
        }
        Ok(false)
    }

    /// Grows the backing so the published capacity covers `last`. One writer
    /// resizes at a time; everyone else re-checks under the lock and bails.
    fn grow(&self, last: usize) -> Result<()> {
        let _lock = self.grow_lock.lock();
        let current = self.published_cap.load(Ordering::SeqCst);
        if current > last {
            return Ok(());
        }
        if unlikely(self.poisoned.load(Ordering::SeqCst)) {
            return Err(Error::Poisoned);
        }
        // Close the capacity gate: from here on every writer that checks the
        // capacity backs off instead of storing, whatever index it holds.
        self.published_cap.store(0, Ordering::SeqCst);
        // Writers that passed the gate before it closed still hold the
        // counter; once it drains, nothing can touch the buffer.
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            hint::spin_loop();
        }
        // SAFETY: the gate is closed, writers are drained and the lock is
        // held; nothing else can access the backing until we publish.
        let backing = unsafe { &mut *self.backing.get() };
        let needed = self.wanted_cap.load(Ordering::SeqCst).max(last + 1);
        let target = grown_capacity(backing.capacity(), needed);
        match backing.grow_to(target) {
            Ok(()) => {
                debug!("concurrent backing grown to {} slots", backing.capacity());
                self.published_cap.store(backing.capacity(), Ordering::SeqCst);
                Ok(())
            }
            Err(source) => {
                // Reopen the gate at the old capacity so reads stay usable,
                // and poison so waiters stop spinning on a capacity that will
                // never arrive.
                self.poisoned.store(true, Ordering::SeqCst);
                self.published_cap.store(current, Ordering::SeqCst);
                Err(source.into())
            }
        }
    }

    /// Copies out the slot at `index` if it is below the current length.
    ///
    /// Concurrent with writers this only tells you the slot was reserved; the
    /// value may still be in flight on another thread.
    #[inline]
    pub fn get(&self, index: usize) -> Option<T> {
        // Readers take the same in-flight mark as writers so a resizer cannot
        // pull the buffer out from under the read.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let cap = self.published_cap.load(Ordering::SeqCst);
        let len = self.len.load(Ordering::SeqCst).min(cap);
        let value = if index < len {
            // SAFETY: index is below a capacity observed while counted in
            // flight; slots tolerate any byte content.
            Some(unsafe { self.buf().add(index).read() })
        } else {
            None
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        value
    }

    /// Borrows the stored elements. Exclusive access proves every writer has
    /// joined, so the contents are stable.
    #[inline]
    pub fn as_slice(&mut self) -> &[T] {
        let len = self.len();
        // SAFETY: &mut self means no writer is active; [0, len) is reserved
        // and below the capacity.
        unsafe { slice::from_raw_parts(self.buf(), len) }
    }

    /// Converts back into the serial form once all writers have joined.
    pub fn into_serial(self) -> MapVec<T, B> {
        let (backing, len) = self.into_parts();
        MapVec::from_parts(backing, len)
    }

    fn into_parts(self) -> (B, usize) {
        let len = self.len();
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped; the backing moves out exactly once.
        (unsafe { ptr::read(this.backing.get()) }, len)
    }

    /// Removing the tail needs an authoritative count.
    pub fn pop(&self) -> Result<T> {
        Err(Error::SerialOnly)
    }

    /// Resetting the count would invalidate outstanding reservations.
    pub fn clear(&self) -> Result<()> {
        Err(Error::SerialOnly)
    }

    /// Resizing would invalidate outstanding reservations.
    pub fn resize(&self, _new_len: usize) -> Result<()> {
        Err(Error::SerialOnly)
    }

    /// Capacity changes are coordinated by the append protocol alone.
    pub fn reserve(&self, _capacity: usize) -> Result<()> {
        Err(Error::SerialOnly)
    }

    /// Trimming needs an authoritative count.
    pub fn shrink_to_fit(&self) -> Result<()> {
        Err(Error::SerialOnly)
    }

    /// In-place construction cannot be interleaved with other writers.
    pub fn push_with(&self, _make: impl FnOnce() -> T) -> Result<()> {
        Err(Error::SerialOnly)
    }

    /// Bounds-checked reads need an authoritative count.
    pub fn read_at(&self, _index: usize) -> Result<T> {
        Err(Error::SerialOnly)
    }
}

impl<T: Slot, B: Backing<T>> Drop for ConcurrentVec<T, B> {
    fn drop(&mut self) {
        let len = self.len();
        self.backing.get_mut().sync(len);
    }
}

impl<T: Slot, B: Backing<T>> fmt::Debug for ConcurrentVec<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentVec")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
