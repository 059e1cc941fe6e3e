//! Receive accumulation for a byte stream that delivers frames in pieces.
//!
//! Reads land in [`RxBuffer::spare_mut`] and are made visible with
//! [`RxBuffer::commit`]. Decoded frames are removed from the front with
//! [`RxBuffer::consume`]. A frame that can never fit is discarded as it
//! streams in, so an oversized publish costs one log line instead of the
//! connection.

/// Fixed-capacity receive buffer.
#[derive(Debug)]
pub struct RxBuffer<const N: usize> {
    buf: [u8; N],
    len: usize,
    skip: usize,
}

impl<const N: usize> Default for RxBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RxBuffer<N> {
    /// An empty buffer.
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            skip: 0,
        }
    }

    /// Buffered bytes not yet consumed.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Free space to read into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Make `n` freshly read bytes visible, minus any that belong to a frame
    /// being skipped.
    pub fn commit(&mut self, n: usize) {
        let n = n.min(N - self.len);
        if self.skip == 0 {
            self.len += n;
            return;
        }

        let dropped = n.min(self.skip);
        self.skip -= dropped;
        let kept = n - dropped;
        let start = self.len + dropped;
        self.buf.copy_within(start..start + kept, self.len);
        self.len += kept;
    }

    /// Drop `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Start discarding a frame of `total` bytes whose head is buffered.
    pub fn begin_skip(&mut self, total: usize) {
        let buffered = total.min(self.len);
        self.consume(buffered);
        self.skip = total - buffered;
    }

    /// Whether a frame is still being discarded.
    pub fn is_skipping(&self) -> bool {
        self.skip > 0
    }

    /// Forget everything, including a pending skip.
    pub fn clear(&mut self) {
        self.len = 0;
        self.skip = 0;
    }

    /// `true` when no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` when no more bytes can be read in.
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Total capacity.
    pub const fn capacity(&self) -> usize {
        N
    }
}
