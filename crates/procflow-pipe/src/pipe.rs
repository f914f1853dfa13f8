//! Bounded async byte pipe
//!
//! One lock guards all state; two binary semaphores act as condition
//! variables. Both signals are recomputed from their predicate after every
//! mutation, which is what keeps write-wake-write-consume-all interleavings
//! from stranding a waiter.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::buffer::RingBuffer;
use crate::error::{PipeError, Result};
use crate::MAX_STABLE_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    Reader,
    Writer,
}

#[derive(Debug)]
struct State {
    buf: RingBuffer,
    writer_closed: bool,
    reader_closed: bool,
    read_in_flight: bool,
    write_in_flight: bool,
    close_reader_pending: bool,
    close_writer_pending: bool,
    /// Present iff fixed-length mode is on.
    space_available: Option<Arc<Semaphore>>,
}

impl State {
    fn fixed_length(&self) -> bool {
        self.space_available.is_some()
    }

    /// Free space against the fixed-length clamp. Zero until the reader
    /// drains an over-grown buffer back below the clamp.
    fn free_space(&self) -> usize {
        MAX_STABLE_CAPACITY.saturating_sub(self.buf.len())
    }
}

struct Shared {
    state: Mutex<State>,
    /// Signalled iff `count > 0 || writer_closed`.
    bytes_available: Semaphore,
}

impl Shared {
    /// Recomputes both condition signals from their predicates. Called at the
    /// end of every state mutation, under the lock.
    fn sync_signals(&self, state: &State) {
        let bytes = state.buf.len() > 0 || state.writer_closed;
        Self::set_signal(&self.bytes_available, bytes);
        if let Some(space) = &state.space_available {
            let target = state.reader_closed || state.free_space() > 0;
            Self::set_signal(space, target);
        }
    }

    /// Drives a binary semaphore to `target` (permit count 0 or 1).
    fn set_signal(sem: &Semaphore, target: bool) {
        let lit = sem.available_permits() > 0;
        if target && !lit {
            sem.add_permits(1);
        } else if !target && lit {
            if let Ok(permit) = sem.try_acquire() {
                permit.forget();
            }
        }
    }

    fn close_half(&self, half: Half) {
        let mut state = self.state.lock();
        match half {
            Half::Reader => {
                if state.reader_closed {
                    return;
                }
                if state.read_in_flight {
                    state.close_reader_pending = true;
                    return;
                }
                state.reader_closed = true;
            }
            Half::Writer => {
                if state.writer_closed {
                    return;
                }
                if state.write_in_flight {
                    state.close_writer_pending = true;
                    return;
                }
                state.writer_closed = true;
            }
        }
        self.after_close(&mut state);
    }

    fn after_close(&self, state: &mut State) {
        if state.reader_closed && state.writer_closed {
            trace!(buffered = state.buf.len(), "both pipe halves closed, releasing buffer");
            state.buf.release();
        }
        self.sync_signals(state);
    }

    /// Clears the in-flight marker for `half` and runs a close deferred
    /// behind the operation, if any.
    fn finish_operation(&self, half: Half) {
        let mut state = self.state.lock();
        match half {
            Half::Reader => {
                state.read_in_flight = false;
                if state.close_reader_pending {
                    state.close_reader_pending = false;
                    state.reader_closed = true;
                    self.after_close(&mut state);
                }
            }
            Half::Writer => {
                state.write_in_flight = false;
                if state.close_writer_pending {
                    state.close_writer_pending = false;
                    state.writer_closed = true;
                    self.after_close(&mut state);
                }
            }
        }
    }
}

/// Clears the in-flight flag even when the operation's future is dropped
/// mid-await, so an abandoned read or write does not wedge the pipe.
struct OpGuard {
    shared: Arc<Shared>,
    half: Half,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.shared.finish_operation(self.half);
    }
}

/// Bounded in-memory byte pipe.
///
/// Hand out the two halves with [`writer`](Pipe::writer) and
/// [`reader`](Pipe::reader). The pipe starts unbounded (writes grow the
/// buffer); [`set_fixed_length`](Pipe::set_fixed_length) switches it to
/// backpressure mode.
pub struct Pipe {
    shared: Arc<Shared>,
}

impl Pipe {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buf: RingBuffer::new(),
                    writer_closed: false,
                    reader_closed: false,
                    read_in_flight: false,
                    write_in_flight: false,
                    close_reader_pending: false,
                    close_writer_pending: false,
                    space_available: None,
                }),
                bytes_available: Semaphore::new(0),
            }),
        }
    }

    /// The write half. Clones share the same underlying pipe; only one write
    /// may be in flight at a time regardless of how many handles exist.
    pub fn writer(&self) -> PipeWriter {
        PipeWriter {
            shared: self.shared.clone(),
        }
    }

    /// The read half.
    pub fn reader(&self) -> PipeReader {
        PipeReader {
            shared: self.shared.clone(),
        }
    }

    /// Switches the pipe to fixed-length (backpressure) mode.
    ///
    /// No-op if already fixed-length or if either half has closed. The
    /// space-available signal starts in whatever state current free space
    /// dictates.
    pub fn set_fixed_length(&self) {
        let mut state = self.shared.state.lock();
        if state.fixed_length() || state.reader_closed || state.writer_closed {
            return;
        }
        state.space_available = Some(Arc::new(Semaphore::new(0)));
        self.shared.sync_signals(&state);
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buf.len()
    }

    /// Bytes of backing storage currently allocated.
    pub fn resident_capacity(&self) -> usize {
        self.shared.state.lock().buf.capacity()
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

/// Write half of a [`Pipe`].
#[derive(Clone)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Writes all of `src`, waiting for space indefinitely.
    pub async fn write(&self, src: &[u8]) -> Result<()> {
        self.write_with(src, None, &CancellationToken::new()).await
    }

    /// Writes all of `src`.
    ///
    /// The timeout and cancellation token apply only to *starting* the
    /// write: once the first slice is accepted, the remainder is written
    /// with an infinite wait, so a failed write never leaves a partial
    /// prefix in the pipe. A write that finds the reader closed succeeds
    /// and discards the bytes.
    pub async fn write_with(
        &self,
        src: &[u8],
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipeError::Cancelled);
        }
        if src.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.shared.state.lock();
            if state.writer_closed || state.close_writer_pending {
                return Err(PipeError::WriterClosed);
            }
            if state.write_in_flight {
                return Err(PipeError::ConcurrentWrite);
            }
            state.write_in_flight = true;
        }
        let _guard = OpGuard {
            shared: self.shared.clone(),
            half: Half::Writer,
        };
        self.write_loop(src, timeout, cancel).await
    }

    async fn write_loop(
        &self,
        src: &[u8],
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut offset = 0;
        let mut first = true;
        loop {
            let space = {
                let mut state = self.shared.state.lock();
                if state.reader_closed {
                    // Bytes written into a closed reader are dropped.
                    return Ok(());
                }
                if !state.fixed_length() {
                    let needed = state.buf.len() + (src.len() - offset);
                    state.buf.ensure_capacity(needed, None)?;
                    state.buf.write(&src[offset..]);
                    self.shared.sync_signals(&state);
                    return Ok(());
                }
                let free = state.free_space();
                if first && free >= src.len() {
                    let needed = state.buf.len() + src.len();
                    state.buf.ensure_capacity(needed, Some(MAX_STABLE_CAPACITY))?;
                    state.buf.write(src);
                    self.shared.sync_signals(&state);
                    return Ok(());
                }
                if !first && free > 0 {
                    let n = free.min(src.len() - offset);
                    let needed = state.buf.len() + n;
                    state.buf.ensure_capacity(needed, Some(MAX_STABLE_CAPACITY))?;
                    state.buf.write(&src[offset..offset + n]);
                    offset += n;
                    self.shared.sync_signals(&state);
                    if offset == src.len() {
                        return Ok(());
                    }
                }
                match &state.space_available {
                    Some(space) => space.clone(),
                    None => return Ok(()),
                }
            };
            if first {
                // Only this first wait can time out or be cancelled; nothing
                // has been written yet, so the failed write has no effect.
                acquire_signal(&space, timeout, Some(cancel)).await?;
                first = false;
            } else {
                acquire_signal(&space, None, None).await?;
            }
        }
    }

    /// Closes the write half; the reader observes EOF once buffered bytes
    /// drain. Idempotent. If a write is in flight the close runs right after
    /// it completes.
    pub fn close(&self) {
        self.shared.close_half(Half::Writer);
    }
}

/// Read half of a [`Pipe`].
#[derive(Clone)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Reads into `dst`, waiting for bytes indefinitely. Returns 0 at EOF.
    pub async fn read(&self, dst: &mut [u8]) -> Result<usize> {
        self.read_with(dst, None, &CancellationToken::new()).await
    }

    /// Reads up to `dst.len()` bytes.
    ///
    /// Returns as soon as any bytes are available (a partial read is
    /// normal); returns `Ok(0)` once the writer has closed and the buffer
    /// is drained.
    pub async fn read_with(
        &self,
        dst: &mut [u8],
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if cancel.is_cancelled() {
            return Err(PipeError::Cancelled);
        }
        if dst.is_empty() {
            return Ok(0);
        }
        {
            let mut state = self.shared.state.lock();
            if state.reader_closed || state.close_reader_pending {
                return Err(PipeError::ReaderClosed);
            }
            if state.read_in_flight {
                return Err(PipeError::ConcurrentRead);
            }
            state.read_in_flight = true;
        }
        let _guard = OpGuard {
            shared: self.shared.clone(),
            half: Half::Reader,
        };
        self.read_inner(dst, timeout, cancel).await
    }

    async fn read_inner(
        &self,
        dst: &mut [u8],
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        {
            let mut state = self.shared.state.lock();
            if state.buf.len() > 0 {
                return Ok(self.take_bytes(&mut state, dst));
            }
            if state.writer_closed {
                return Ok(0);
            }
        }
        acquire_signal(&self.shared.bytes_available, timeout, Some(cancel)).await?;
        let mut state = self.shared.state.lock();
        // The signal implies bytes or writer-closed; with a single reader
        // neither can be unwound between the wake-up and this lock.
        Ok(self.take_bytes(&mut state, dst))
    }

    fn take_bytes(&self, state: &mut State, dst: &mut [u8]) -> usize {
        let n = state.buf.read(dst);
        if state.fixed_length() && state.buf.len() == 0 {
            state.buf.shrink_to(MAX_STABLE_CAPACITY);
        }
        self.shared.sync_signals(state);
        n
    }

    /// Closes the read half. Later writes succeed but are discarded.
    /// Idempotent; defers behind an in-flight read like
    /// [`PipeWriter::close`].
    pub fn close(&self) {
        self.shared.close_half(Half::Reader);
    }
}

/// Waits for a binary semaphore to light up, consuming the permit.
async fn acquire_signal(
    sem: &Semaphore,
    timeout: Option<Duration>,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    let wait = async {
        match sem.acquire().await {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            // The semaphore is never closed while a half is open.
            Err(_) => Err(PipeError::Cancelled),
        }
    };
    let timed = async {
        match timeout {
            Some(limit) => time::timeout(limit, wait)
                .await
                .map_err(|_| PipeError::Timeout)?,
            None => wait.await,
        }
    };
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(PipeError::Cancelled),
                res = timed => res,
            }
        }
        None => timed.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let pipe = Pipe::new();
        let (w, r) = (pipe.writer(), pipe.reader());
        w.write(b"abcd").await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"abcd");
    }

    #[tokio::test]
    async fn eof_after_writer_close() {
        let pipe = Pipe::new();
        let (w, r) = (pipe.writer(), pipe.reader());
        w.write(b"x").await.unwrap();
        w.close();
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).await.unwrap(), 1);
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_length_ops_complete_immediately() {
        let pipe = Pipe::new();
        let (w, r) = (pipe.writer(), pipe.reader());
        w.write(b"").await.unwrap();
        let mut empty = [0u8; 0];
        assert_eq!(r.read(&mut empty).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_to_closed_reader_is_discarded() {
        let pipe = Pipe::new();
        let (w, r) = (pipe.writer(), pipe.reader());
        r.close();
        w.write(b"dropped").await.unwrap();
        assert_eq!(pipe.buffered(), 0);
    }

    #[tokio::test]
    async fn closed_halves_reject_their_own_ops() {
        let pipe = Pipe::new();
        let (w, r) = (pipe.writer(), pipe.reader());
        w.close();
        assert_eq!(w.write(b"x").await, Err(PipeError::WriterClosed));
        r.close();
        let mut buf = [0u8; 1];
        assert_eq!(r.read(&mut buf).await, Err(PipeError::ReaderClosed));
    }

    #[tokio::test]
    async fn read_blocks_until_write_arrives() {
        let pipe = Pipe::new();
        let (w, r) = (pipe.writer(), pipe.reader());
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            let n = r.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        w.write(b"late").await.unwrap();
        assert_eq!(reader.await.unwrap(), b"late");
    }

    #[tokio::test]
    async fn read_times_out_when_no_bytes_arrive() {
        let pipe = Pipe::new();
        let r = pipe.reader();
        let mut buf = [0u8; 4];
        let err = r
            .read_with(&mut buf, Some(Duration::from_millis(20)), &CancellationToken::new())
            .await;
        assert_eq!(err, Err(PipeError::Timeout));
        // The pipe stays usable after a timed-out operation.
        pipe.writer().write(b"ok").await.unwrap();
        assert_eq!(r.read(&mut buf).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pre_cancelled_token_fails_fast() {
        let pipe = Pipe::new();
        let token = CancellationToken::new();
        token.cancel();
        let mut buf = [0u8; 4];
        assert_eq!(
            pipe.reader().read_with(&mut buf, None, &token).await,
            Err(PipeError::Cancelled)
        );
        assert_eq!(
            pipe.writer().write_with(b"x", None, &token).await,
            Err(PipeError::Cancelled)
        );
    }

    #[tokio::test]
    async fn cancel_mid_wait_aborts_read() {
        let pipe = Pipe::new();
        let r = pipe.reader();
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                r.read_with(&mut buf, None, &token).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        assert_eq!(waiter.await.unwrap(), Err(PipeError::Cancelled));
    }

    #[tokio::test]
    async fn concurrent_reads_are_rejected() {
        let pipe = Pipe::new();
        let r1 = pipe.reader();
        let r2 = pipe.reader();
        let blocked = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            r1.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut buf = [0u8; 4];
        assert_eq!(
            r2.read_with(&mut buf, Some(Duration::from_millis(10)), &CancellationToken::new())
                .await,
            Err(PipeError::ConcurrentRead)
        );
        pipe.writer().close();
        assert_eq!(blocked.await.unwrap(), Ok(0));
    }

    #[tokio::test]
    async fn fixed_length_write_blocks_until_reader_drains() {
        let pipe = Pipe::new();
        pipe.set_fixed_length();
        let (w, r) = (pipe.writer(), pipe.reader());
        let payload = vec![7u8; MAX_STABLE_CAPACITY + 1];
        let writer = tokio::spawn(async move { w.write(&payload).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());
        assert_eq!(pipe.buffered(), MAX_STABLE_CAPACITY);
        let mut buf = vec![0u8; MAX_STABLE_CAPACITY + 1];
        let mut total = 0;
        while total < buf.len() {
            let n = r.read(&mut buf[total..]).await.unwrap();
            total += n;
        }
        writer.await.unwrap().unwrap();
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[tokio::test]
    async fn fixed_length_write_times_out_with_nothing_written() {
        let pipe = Pipe::new();
        pipe.set_fixed_length();
        let (w, r) = (pipe.writer(), pipe.reader());
        w.write(&vec![1u8; MAX_STABLE_CAPACITY]).await.unwrap();
        let err = w
            .write_with(
                b"overflow",
                Some(Duration::from_millis(20)),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(err, Err(PipeError::Timeout));
        // The failed write left no partial prefix behind.
        assert_eq!(pipe.buffered(), MAX_STABLE_CAPACITY);
        let mut buf = vec![0u8; MAX_STABLE_CAPACITY];
        let mut total = 0;
        while total < buf.len() {
            total += r.read(&mut buf[total..]).await.unwrap();
        }
        assert!(buf.iter().all(|&b| b == 1));
    }

    #[tokio::test]
    async fn deferred_close_runs_after_in_flight_read() {
        let pipe = Pipe::new();
        let r = pipe.reader();
        let r2 = pipe.reader();
        let blocked = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            r.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Close defers behind the blocked read, then runs.
        r2.close();
        pipe.writer().write(b"wake").await.unwrap();
        assert_eq!(blocked.await.unwrap(), Ok(4));
        let mut buf = [0u8; 4];
        assert_eq!(r2.read(&mut buf).await, Err(PipeError::ReaderClosed));
    }

    #[tokio::test]
    async fn buffer_released_when_both_halves_close() {
        let pipe = Pipe::new();
        let (w, r) = (pipe.writer(), pipe.reader());
        w.write(&vec![0u8; 4096]).await.unwrap();
        assert!(pipe.resident_capacity() >= 4096);
        w.close();
        r.close();
        assert_eq!(pipe.resident_capacity(), 0);
        assert_eq!(pipe.buffered(), 0);
    }

    #[tokio::test]
    async fn abandoned_read_does_not_wedge_the_pipe() {
        let pipe = Pipe::new();
        let r = pipe.reader();
        {
            let r = r.clone();
            let pending = tokio::spawn(async move {
                let mut buf = [0u8; 4];
                r.read(&mut buf).await
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
            pending.abort();
            let _ = pending.await;
        }
        pipe.writer().write(b"ok").await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).await.unwrap(), 2);
    }
}
