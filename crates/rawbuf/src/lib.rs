#![doc = include_str!("../README.md")]

mod anon;
mod backing;
pub mod error;
mod file;
mod heap;
mod hints;
mod slot;

pub use anon::*;
pub use backing::*;
pub use error::*;
pub use file::*;
pub use heap::*;
pub use hints::*;
pub use slot::*;

pub const PAGE_SIZE: usize = 4096;

/// Smallest capacity, in slots, that any backing starts with or shrinks to.
pub const MIN_CAPACITY: usize = 16;
