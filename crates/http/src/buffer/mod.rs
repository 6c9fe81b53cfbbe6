//! Fixed-capacity byte buffers shared between connections.
//!
//! Every connection borrows exactly one [`SlotPair`] (a receive slot and a send slot)
//! from the [`SlotPool`] for its whole lifetime. The pool is sized once at server start,
//! so the number of pairs is also the number of connections that can be served at the
//! same time. With a single pair the server needs two slot-sized buffers in total.

mod slot;

pub use slot::BufferSlot;
pub use slot::SlotPair;
pub use slot::SlotPool;
