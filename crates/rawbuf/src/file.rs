use std::{
    fmt,
    fs::{File, OpenOptions},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use log::{debug, warn};
#[cfg(target_os = "linux")]
use memmap2::RemapOptions;
use memmap2::{MmapMut, MmapOptions};

use crate::{Backing, Error, MIN_CAPACITY, PAGE_SIZE, Result, Slot, byte_len};

/// Shared mapping of a named file.
///
/// The file is a raw host-endian array of `T` with no header. While mapped
/// its length always equals `capacity * size_of::<T>()`; dropping the backing
/// trims it back to the synced slot count, so a cleanly closed file holds
/// exactly the stored data. A file whose length is not a whole number of
/// slots is rejected at open.
#[must_use = "dropping the backing trims and closes the file"]
pub struct FileBacking<T: Slot> {
    path: PathBuf,
    // Field order matters: the map must unmap before the file closes.
    map: MmapMut,
    file: File,
    capacity: usize,
    backing_len: usize,
    _slot: PhantomData<T>,
}

impl<T: Slot> FileBacking<T> {
    /// Opens or creates `path` read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenOptions::new().read(true).write(true).create(true))
    }

    /// Opens `path` with caller-supplied options (creation behaviour,
    /// permission mode bits). The options must yield a readable and writable
    /// handle.
    pub fn open_with(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        const {
            assert!(size_of::<T>() != 0, "zero-sized slots are not supported");
            assert!(align_of::<T>() <= PAGE_SIZE, "slot alignment exceeds the page size");
        }
        let path = path.as_ref().to_owned();
        let file = options.open(&path).map_err(Error::io("open"))?;

        let file_len = file.metadata().map_err(Error::io("stat"))?.len();
        if !file_len.is_multiple_of(size_of::<T>() as u64) {
            return Err(Error::CorruptedFile {
                file_len,
                slot_size: size_of::<T>(),
            });
        }

        let backing_len = file_len as usize / size_of::<T>();
        let capacity = backing_len.max(MIN_CAPACITY);
        let capacity_bytes = byte_len::<T>(capacity)?;
        if (file_len as usize) < capacity_bytes {
            file.set_len(capacity_bytes as u64)
                .map_err(Error::io("ftruncate"))?;
        }

        // SAFETY: the mapping is shared with the file but private to this
        // backing; the handle outlives the map (field order).
        let map = unsafe { MmapOptions::new().map_mut(&file) }.map_err(Error::io("mmap"))?;

        debug!(
            "{}: opened with {backing_len} stored slots, capacity {capacity}",
            path.display()
        );

        Ok(Self {
            path,
            map,
            file,
            capacity,
            backing_len,
            _slot: PhantomData,
        })
    }

    /// Path of the backing file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resizes file and mapping together so both always span the capacity.
    fn resize(&mut self, slots: usize) -> Result<()> {
        let new_len = byte_len::<T>(slots)?;
        self.file
            .set_len(new_len as u64)
            .map_err(Error::io("ftruncate"))?;

        #[cfg(target_os = "linux")]
        // SAFETY: no reference into the mapping is live across this call.
        unsafe {
            self.map
                .remap(new_len, RemapOptions::new().may_move(true))
                .map_err(Error::io("mremap"))?;
        }

        #[cfg(not(target_os = "linux"))]
        {
            // A shared file mapping is coherent with the file, so a fresh map
            // sees every byte the old one wrote.
            self.map =
                unsafe { MmapOptions::new().map_mut(&self.file) }.map_err(Error::io("mmap"))?;
        }

        self.capacity = slots;
        Ok(())
    }
}

impl<T: Slot> Backing<T> for FileBacking<T> {
    #[inline(always)]
    fn ptr(&self) -> *mut T {
        self.map.as_ptr() as *mut T
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    fn backing_len(&self) -> usize {
        self.backing_len
    }

    fn grow_to(&mut self, wanted: usize) -> Result<()> {
        // Resizes in both directions, unlike the other backings: handing
        // space back here is what trims files.
        let wanted = wanted.max(MIN_CAPACITY);
        if wanted == self.capacity {
            return Ok(());
        }
        self.resize(wanted)
    }

    #[inline]
    fn sync(&mut self, used: usize) {
        self.backing_len = used;
    }
}

impl<T: Slot> Drop for FileBacking<T> {
    fn drop(&mut self) {
        // Trim spare capacity so the file holds exactly the synced slots.
        // Best effort: on failure the file keeps trailing capacity, still a
        // whole number of slots.
        let final_len = (self.backing_len * size_of::<T>()) as u64;
        if let Err(source) = self.file.set_len(final_len) {
            warn!(
                "{}: could not trim to {final_len} bytes: {source}",
                self.path.display()
            );
        }
    }
}

impl<T: Slot> fmt::Debug for FileBacking<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBacking")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("backing_len", &self.backing_len)
            .finish()
    }
}
