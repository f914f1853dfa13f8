//! Ring buffer backing a pipe

use crate::error::{PipeError, Result};

/// Smallest capacity allocated once the buffer holds any data.
const MIN_CAPACITY: usize = 256;

/// Hard ceiling on buffered bytes.
const MAX_CAPACITY: usize = i32::MAX as usize;

/// Contiguously allocated ring buffer with logical `start` and `count`.
///
/// Starts with no allocation at all; `release` returns it to that state so a
/// fully closed pipe holds no memory beyond the struct itself.
#[derive(Debug, Default)]
pub(crate) struct RingBuffer {
    data: Vec<u8>,
    start: usize,
    count: usize,
}

impl RingBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Grows the buffer so at least `needed` bytes fit, keeping buffered
    /// content. Growth is geometric; `clamp` bounds the new capacity in
    /// fixed-length mode.
    pub(crate) fn ensure_capacity(&mut self, needed: usize, clamp: Option<usize>) -> Result<()> {
        if needed > MAX_CAPACITY {
            return Err(PipeError::TooLong);
        }
        let current = self.data.len();
        if needed <= current {
            return Ok(());
        }
        let mut target = if current < MIN_CAPACITY {
            needed.max(MIN_CAPACITY)
        } else {
            needed.max(current.saturating_mul(2))
        };
        target = target.min(MAX_CAPACITY);
        if let Some(clamp) = clamp {
            debug_assert!(needed <= clamp);
            target = target.min(clamp);
        }
        self.reallocate(target);
        Ok(())
    }

    /// Appends `src` at the logical end. The caller has already ensured the
    /// capacity; the copy splits in two where it wraps.
    pub(crate) fn write(&mut self, src: &[u8]) {
        debug_assert!(self.count + src.len() <= self.data.len());
        let cap = self.data.len();
        let write_at = (self.start + self.count) % cap;
        let tail = cap - write_at;
        if src.len() <= tail {
            self.data[write_at..write_at + src.len()].copy_from_slice(src);
        } else {
            self.data[write_at..].copy_from_slice(&src[..tail]);
            self.data[..src.len() - tail].copy_from_slice(&src[tail..]);
        }
        self.count += src.len();
    }

    /// Copies up to `dst.len()` bytes out from the logical start, advancing
    /// it. Returns how many bytes were read.
    pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.count);
        if n == 0 {
            return 0;
        }
        let cap = self.data.len();
        let tail = cap - self.start;
        if n <= tail {
            dst[..n].copy_from_slice(&self.data[self.start..self.start + n]);
        } else {
            dst[..tail].copy_from_slice(&self.data[self.start..]);
            dst[tail..n].copy_from_slice(&self.data[..n - tail]);
        }
        self.start = (self.start + n) % cap;
        self.count -= n;
        if self.count == 0 {
            self.start = 0;
        }
        n
    }

    /// Shrinks an over-grown buffer back down to `cap`. Only meaningful once
    /// the buffered content fits.
    pub(crate) fn shrink_to(&mut self, cap: usize) {
        if self.data.len() <= cap || self.count > cap {
            return;
        }
        self.reallocate(cap);
    }

    /// Drops the backing allocation entirely.
    pub(crate) fn release(&mut self) {
        self.data = Vec::new();
        self.start = 0;
        self.count = 0;
    }

    /// Moves content into a fresh linear allocation of `new_cap`.
    fn reallocate(&mut self, new_cap: usize) {
        let mut fresh = vec![0u8; new_cap];
        let count = self.count;
        let read = self.read(&mut fresh[..count]);
        debug_assert_eq!(read, count);
        self.data = fresh;
        self.start = 0;
        self.count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unallocated() {
        let buf = RingBuffer::new();
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn grows_to_min_capacity_first() {
        let mut buf = RingBuffer::new();
        buf.ensure_capacity(10, None).unwrap();
        assert_eq!(buf.capacity(), 256);
    }

    #[test]
    fn grows_geometrically() {
        let mut buf = RingBuffer::new();
        buf.ensure_capacity(256, None).unwrap();
        buf.ensure_capacity(257, None).unwrap();
        assert_eq!(buf.capacity(), 512);
    }

    #[test]
    fn clamp_bounds_growth() {
        let mut buf = RingBuffer::new();
        buf.ensure_capacity(300, Some(300)).unwrap();
        assert_eq!(buf.capacity(), 300);
    }

    #[test]
    fn rejects_oversized_request() {
        let mut buf = RingBuffer::new();
        assert_eq!(
            buf.ensure_capacity(i32::MAX as usize + 1, None),
            Err(PipeError::TooLong)
        );
    }

    #[test]
    fn wrapping_write_and_read_round_trip() {
        let mut buf = RingBuffer::new();
        buf.ensure_capacity(8, Some(8)).unwrap();
        buf.write(b"abcdef");
        let mut out = [0u8; 4];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(&out, b"abcd");
        // Wraps around the end of the 8-byte allocation.
        buf.write(b"ghijkl");
        let mut rest = [0u8; 8];
        let n = buf.read(&mut rest);
        assert_eq!(&rest[..n], b"efghijkl");
    }

    #[test]
    fn shrink_preserves_content() {
        let mut buf = RingBuffer::new();
        buf.ensure_capacity(1024, None).unwrap();
        buf.write(b"keep me");
        buf.shrink_to(256);
        assert_eq!(buf.capacity(), 256);
        let mut out = [0u8; 7];
        assert_eq!(buf.read(&mut out), 7);
        assert_eq!(&out, b"keep me");
    }

    #[test]
    fn release_drops_allocation() {
        let mut buf = RingBuffer::new();
        buf.ensure_capacity(512, None).unwrap();
        buf.write(b"gone");
        buf.release();
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.len(), 0);
    }
}
