use std::result;

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Error types for mapvec operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Backing(#[from] rawbuf::Error),

    #[error("index {index} out of range (len: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("only supported by the serial vector")]
    SerialOnly,

    #[error("vector poisoned by a failed grow")]
    Poisoned,
}
