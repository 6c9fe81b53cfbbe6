use std::collections::TryReserveError;
use std::fmt;

/// A reusable, fixed-capacity byte buffer.
///
/// The buffer is allocated once and never zeroed afterwards: a connection that borrows a
/// slot sees whatever the previous connection left behind and must only trust the bytes it
/// wrote itself.
pub struct BufferSlot {
    bytes: Box<[u8]>,
}

impl BufferSlot {
    pub fn new(capacity: usize) -> Self {
        Self { bytes: vec![0; capacity].into_boxed_slice() }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if a view of `len` bytes can be served from this slot.
    #[inline]
    pub fn fits(&self, len: usize) -> bool {
        len <= self.bytes.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Allocates a dedicated buffer for a request that does not fit into a slot.
    ///
    /// The returned memory belongs to the caller and never joins the pool. Allocation
    /// failure is reported instead of aborting the process.
    pub fn overflow(len: usize) -> Result<Vec<u8>, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);
        Ok(buf)
    }
}

impl fmt::Debug for BufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSlot").field("capacity", &self.capacity()).finish()
    }
}

/// The receive and send slots loaned to one connection.
///
/// A pair is moved out of the pool on acquire and moved back on release, so holding the
/// pair is the proof of ownership: two connections can never see the same slot.
#[derive(Debug)]
pub struct SlotPair {
    pub recv: BufferSlot,
    pub send: BufferSlot,
}

/// A pool of `K` slot pairs, where `K` bounds the number of live connections.
#[derive(Debug)]
pub struct SlotPool {
    free: Vec<SlotPair>,
    capacity: usize,
    slot_size: usize,
}

impl SlotPool {
    /// Creates a pool holding `capacity` pairs of `slot_size` byte slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, slot_size: usize) -> Self {
        assert!(capacity > 0, "slot pool needs at least one slot pair");
        let free = (0..capacity)
            .map(|_| SlotPair { recv: BufferSlot::new(slot_size), send: BufferSlot::new(slot_size) })
            .collect();
        Self { free, capacity, slot_size }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of pairs that are currently not loaned.
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Loans a pair, or returns `None` when every pair is in use.
    pub fn acquire(&mut self) -> Option<SlotPair> {
        self.free.pop()
    }

    /// Returns a loaned pair to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the pool is already full, which means the pair was not loaned by this
    /// pool or was released twice.
    pub fn release(&mut self, pair: SlotPair) {
        assert!(self.free.len() < self.capacity, "released a slot pair that this pool did not loan");
        debug_assert_eq!(pair.recv.capacity(), self.slot_size);
        self.free.push(pair);
    }
}
