use std::{io, result};

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Error types for rawbuf operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("allocation of {bytes} bytes failed")]
    AllocationFailed { bytes: usize },

    #[error("file length {file_len} is not a multiple of the {slot_size}-byte slot size")]
    CorruptedFile { file_len: u64, slot_size: usize },
}

impl Error {
    /// Tags an `io::Error` with the system call that produced it.
    #[inline]
    pub(crate) fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { op, source }
    }
}
