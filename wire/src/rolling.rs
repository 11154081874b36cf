//! Rolling read buffer.
//!
//! A growable byte buffer with `head`/`tail` indexes. Incoming reads land
//! past `head`; parsed frames advance `tail`. Growth is deferred as long as
//! possible: when the write region runs dry the buffer first compacts
//! (moving the live bytes back to offset zero) and only doubles its
//! capacity when it is genuinely full.

/// Growable read buffer with deferred compaction.
#[derive(Debug)]
pub struct RollingBuffer {
    buf: Vec<u8>,
    head: usize,
    tail: usize,
}

impl RollingBuffer {
    /// Create a buffer with at least one byte of capacity.
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    /// Create a buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            head: 0,
            tail: 0,
        }
    }

    /// Bytes available for parsing.
    pub fn readable(&self) -> &[u8] {
        &self.buf[self.tail..self.head]
    }

    /// Number of buffered, unparsed bytes.
    pub fn len(&self) -> usize {
        debug_assert!(self.head >= self.tail);
        self.head - self.tail
    }

    /// True when no unparsed bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Free bytes past `head`.
    pub fn free_capacity(&self) -> usize {
        self.capacity() - self.head
    }

    /// The writable region past the buffered bytes.
    pub fn writable_tail(&mut self) -> &mut [u8] {
        let head = self.head;
        &mut self.buf[head..]
    }

    /// Mark `n` freshly written bytes as buffered.
    pub fn commit(&mut self, n: usize) {
        self.head += n;
        debug_assert!(self.head <= self.buf.len());
    }

    /// Discard `n` parsed bytes from the front.
    pub fn consume(&mut self, n: usize) {
        self.tail += n;
        debug_assert!(self.tail <= self.head);
        if self.tail == self.head {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Move the live bytes to offset zero.
    pub fn compact(&mut self) {
        self.buf.copy_within(self.tail..self.head, 0);
        self.head -= self.tail;
        self.tail = 0;
    }

    /// Guarantee at least one writable byte.
    ///
    /// Compacts when any consumed prefix can be reclaimed; doubles the
    /// capacity only when the buffer is full with `tail` already at zero.
    pub fn ensure_writable(&mut self) {
        if self.free_capacity() > 0 {
            return;
        }
        if self.tail > 0 {
            self.compact();
        } else {
            let grown = self.buf.len() * 2;
            self.buf.resize(grown, 0);
        }
    }
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
