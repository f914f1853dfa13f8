//! Child output reader with an eager drain
//!
//! The OS gives child stdout/stderr a small fixed buffer; a child that fills
//! it blocks. The reader therefore spawns a drain task at construction that
//! keeps copying from the OS pipe into an in-memory [`Pipe`], which grows
//! unbounded by default. Callers that hand the stream onward switch the pipe
//! to fixed-length so memory stays flat and the child paces itself instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use encoding_rs::Encoding;
use procflow_pipe::{Pipe, PipeReader, CHUNK_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{CommandError, Result};
use crate::stdio::StdioChannel;

struct ReaderInner {
    channel: StdioChannel,
    pipe: Pipe,
    reader: PipeReader,
    discarded: AtomicBool,
    encoding: &'static Encoding,
    /// Bytes read out of the pipe but not yet returned as a full line.
    pending: Mutex<Vec<u8>>,
}

/// Reader over a child's standard output or standard error.
///
/// Clones share one underlying stream position; reads through any clone
/// consume the same bytes.
#[derive(Clone)]
pub struct OutputReader {
    inner: Arc<ReaderInner>,
}

impl OutputReader {
    /// Wraps an OS child pipe and starts the drain task. The returned handle
    /// must be joined into the owning command's I/O task set.
    pub(crate) fn spawn<R>(
        channel: StdioChannel,
        os_pipe: R,
        encoding: &'static Encoding,
    ) -> (Self, JoinHandle<Result<()>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pipe = Pipe::new();
        let reader = pipe.reader();
        let writer = pipe.writer();
        let inner = Arc::new(ReaderInner {
            channel,
            pipe,
            reader,
            discarded: AtomicBool::new(false),
            encoding,
            pending: Mutex::new(Vec::new()),
        });

        let drain_flag = inner.clone();
        let drain = tokio::spawn(async move {
            let mut os_pipe = os_pipe;
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let outcome = loop {
                if drain_flag.discarded.load(Ordering::Acquire) {
                    trace!(channel = %channel, "drain short-circuited by discard");
                    break Ok(());
                }
                match os_pipe.read(&mut chunk).await {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if let Err(err) = writer.write(&chunk[..n]).await {
                            break Err(CommandError::from(err));
                        }
                    }
                    Err(err) => {
                        break Err(CommandError::Io {
                            stream: channel,
                            message: err.to_string(),
                        })
                    }
                }
            };
            writer.close();
            drop(os_pipe);
            outcome
        });

        (Self { inner }, drain)
    }

    pub fn channel(&self) -> StdioChannel {
        self.inner.channel
    }

    /// Raw byte read; `Ok(0)` at end of stream or after [`discard`](Self::discard).
    pub async fn read(&self, dst: &mut [u8]) -> Result<usize> {
        self.read_with(dst, None, &CancellationToken::new()).await
    }

    /// Raw byte read with a per-operation timeout and cancellation token.
    pub async fn read_with(
        &self,
        dst: &mut [u8],
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if self.inner.discarded.load(Ordering::Acquire) {
            return Ok(0);
        }
        match self.inner.reader.read_with(dst, timeout, cancel).await {
            Ok(n) => Ok(n),
            // Discarded between the check above and the pipe read: a
            // discarded stream reads as empty, never as an error.
            Err(procflow_pipe::PipeError::ReaderClosed)
                if self.inner.discarded.load(Ordering::Acquire) =>
            {
                Ok(0)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drains the remaining stream and decodes it as one string.
    pub async fn read_to_string(&self) -> Result<String> {
        let mut pending = self.inner.pending.lock().await;
        let mut bytes = std::mem::take(&mut *pending);
        if !self.inner.discarded.load(Ordering::Acquire) {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                let n = self.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                bytes.extend_from_slice(&chunk[..n]);
            }
        }
        let (text, _, _) = self.inner.encoding.decode(&bytes);
        Ok(text.into_owned())
    }

    /// Next line without its terminator, or `None` at end of stream.
    /// Recognizes `\n` and `\r\n`.
    pub async fn read_line(&self) -> Result<Option<String>> {
        let mut pending = self.inner.pending.lock().await;
        loop {
            if let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let (text, _, _) = self.inner.encoding.decode(&line);
                return Ok(Some(text.into_owned()));
            }
            if self.inner.discarded.load(Ordering::Acquire) {
                pending.clear();
                return Ok(None);
            }
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                if pending.is_empty() {
                    return Ok(None);
                }
                let (text, _, _) = self.inner.encoding.decode(&pending);
                let line = text.into_owned();
                pending.clear();
                return Ok(Some(line));
            }
            pending.extend_from_slice(&chunk[..n]);
        }
    }

    /// Stops capturing: the drain loop exits, the OS pipe closes, and
    /// subsequent reads return empty. The child may observe a broken pipe
    /// if it keeps writing.
    pub fn discard(&self) {
        self.inner.discarded.store(true, Ordering::Release);
        self.inner.reader.close();
    }

    /// Switches the backing pipe to fixed-length so the drain becomes a
    /// backpressured copy instead of an unbounded capture.
    pub fn stop_buffering(&self) {
        self.inner.pipe.set_fixed_length();
    }
}
