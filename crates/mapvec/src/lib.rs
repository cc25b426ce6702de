#![doc = include_str!("../README.md")]

pub use rawbuf::{
    AnonBacking, Backing, Error as RawBufError, FileBacking, HeapBacking, MIN_CAPACITY, PAGE_SIZE,
    Slot, grown_capacity, likely, unlikely,
};

mod concurrent;
mod error;
mod vector;

pub use concurrent::*;
pub use error::*;
pub use vector::*;

/// Serial vector on the heap backing.
pub type HeapVec<T> = MapVec<T, HeapBacking<T>>;
/// Serial vector on an anonymous mapping.
pub type AnonVec<T> = MapVec<T, AnonBacking<T>>;
/// Serial vector on a file mapping.
pub type FileVec<T> = MapVec<T, FileBacking<T>>;

/// Many-writer vector on the heap backing.
pub type ConcurrentHeapVec<T> = ConcurrentVec<T, HeapBacking<T>>;
/// Many-writer vector on an anonymous mapping.
pub type ConcurrentAnonVec<T> = ConcurrentVec<T, AnonBacking<T>>;
/// Many-writer vector on a file mapping.
pub type ConcurrentFileVec<T> = ConcurrentVec<T, FileBacking<T>>;
