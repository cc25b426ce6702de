use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Marker for element types a backing can hold.
///
/// Buffers grow by relocating their content with a plain byte copy, and the
/// file backing reads values straight out of whatever bytes the file holds.
/// The zerocopy bounds make both moves sound: every bit pattern is a valid
/// value and none of them owns anything that would need dropping.
pub trait Slot: FromBytes + IntoBytes + Immutable + Copy + Send + Sync + 'static {}

impl<T> Slot for T where T: FromBytes + IntoBytes + Immutable + Copy + Send + Sync + 'static {}
