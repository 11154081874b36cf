//! Chunked write queues.
//!
//! Outgoing bytes accumulate in fixed-size chunks drawn from a free list,
//! so steady-state sending allocates nothing per message. A
//! [`DoubleWriteBuf`] pairs two such queues: while one is being written to
//! the socket, the other keeps taking appends; completing a write flips
//! them.

/// Fixed chunk size in bytes.
pub const CHUNK_SIZE: usize = 1024;

/// A fixed-size block of outgoing bytes.
#[derive(Debug)]
pub struct Chunk {
    buf: Box<[u8; CHUNK_SIZE]>,
    len: usize,
}

impl Chunk {
    fn new() -> Self {
        Self {
            buf: Box::new([0; CHUNK_SIZE]),
            len: 0,
        }
    }

    /// The bytes written so far.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Free bytes remaining in this chunk.
    pub fn free_capacity(&self) -> usize {
        CHUNK_SIZE - self.len
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy as much of `data` as fits; returns the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let n = self.free_capacity().min(data.len());
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    /// Mark all bytes free again.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// An ordered list of chunks forming one send queue.
#[derive(Debug, Default)]
pub struct WriteBuf {
    chunks: Vec<Chunk>,
}

impl WriteBuf {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no bytes are queued.
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Chunk::is_empty)
    }

    /// Total queued bytes.
    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(|c| c.len).sum()
    }

    /// Append `data`, pulling chunks from `free` before allocating new ones.
    pub fn append(&mut self, mut data: &[u8], free: &mut Vec<Chunk>) {
        while !data.is_empty() {
            let n = match self.chunks.last_mut() {
                Some(tail) if tail.free_capacity() > 0 => tail.append(data),
                _ => {
                    self.chunks.push(free.pop().unwrap_or_else(Chunk::new));
                    0
                }
            };
            data = &data[n..];
        }
    }

    /// Iterate the filled chunks in order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| !c.is_empty())
    }

    /// Clear the queue, returning every chunk to `free`.
    pub fn clear_into(&mut self, free: &mut Vec<Chunk>) {
        for mut chunk in self.chunks.drain(..) {
            chunk.clear();
            free.push(chunk);
        }
    }
}

/// Two send queues sharing a free list; one takes appends while the other
/// is in flight.
#[derive(Debug)]
pub struct DoubleWriteBuf {
    bufs: [WriteBuf; 2],
    cur: usize,
    free: Vec<Chunk>,
}

impl DoubleWriteBuf {
    /// Create an empty double buffer.
    pub fn new() -> Self {
        Self {
            bufs: [WriteBuf::new(), WriteBuf::new()],
            cur: 0,
            free: Vec::new(),
        }
    }

    /// Append to the currently active queue.
    pub fn append(&mut self, data: &[u8]) {
        self.bufs[self.cur].append(data, &mut self.free);
    }

    /// True when the active queue holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bufs[self.cur].is_empty()
    }

    /// Hand out the filled queue and make the other one active.
    ///
    /// The caller flips exactly when it begins a write, so appends made
    /// during the flight land on the idle queue. The queue being switched
    /// to must be empty.
    pub fn flip(&mut self) -> WriteBuf {
        let filled = std::mem::take(&mut self.bufs[self.cur]);
        self.cur ^= 1;
        debug_assert!(self.bufs[self.cur].is_empty());
        filled
    }

    /// Return a flushed queue's chunks to the free list.
    pub fn recycle(&mut self, mut buf: WriteBuf) {
        buf.clear_into(&mut self.free);
    }

    #[cfg(test)]
    fn free_chunks(&self) -> usize {
        self.free.len()
    }
}

impl Default for DoubleWriteBuf {
    fn default() -> Self {
        Self::new()
    }
}
