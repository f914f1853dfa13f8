//! Child stdin writer
//!
//! What happens when you write to an exited child's stdin differs per OS:
//! some report nothing, some a broken pipe, some a write fault. The writer
//! levels this out by swallowing every OS-level write/flush error, so a
//! write after exit is always a quiet no-op for the caller.

use std::sync::Arc;

use encoding_rs::Encoding;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::stdio::StdioChannel;

#[cfg(windows)]
const LINE_TERMINATOR: &str = "\r\n";
#[cfg(not(windows))]
const LINE_TERMINATOR: &str = "\n";

type BoxedSink = Box<dyn AsyncWrite + Send + Unpin>;

struct WriterInner {
    sink: Mutex<Option<BoxedSink>>,
    encoding: &'static Encoding,
}

/// Writer over a child's standard input.
#[derive(Clone)]
pub struct InputWriter {
    inner: Arc<WriterInner>,
}

impl InputWriter {
    pub(crate) fn new<W>(sink: W, encoding: &'static Encoding) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(WriterInner {
                sink: Mutex::new(Some(Box::new(sink))),
                encoding,
            }),
        }
    }

    /// Writes raw bytes. Never fails; bytes sent after the child exits are
    /// dropped.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.inner.sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            if let Err(err) = sink.write_all(bytes).await {
                trace!(stream = %StdioChannel::Stdin, error = %err, "swallowed stdin write error");
            }
        }
        Ok(())
    }

    /// Encodes and writes a string.
    pub async fn write_text(&self, text: &str) -> Result<()> {
        let (bytes, _, _) = self.inner.encoding.encode(text);
        self.write(&bytes).await
    }

    /// Encodes and writes a string followed by the platform line terminator.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        self.write_text(line).await?;
        self.write_text(LINE_TERMINATOR).await
    }

    /// Flushes buffered bytes toward the child. Never fails.
    pub async fn flush(&self) -> Result<()> {
        let mut guard = self.inner.sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            if let Err(err) = sink.flush().await {
                trace!(stream = %StdioChannel::Stdin, error = %err, "swallowed stdin flush error");
            }
        }
        Ok(())
    }

    /// Closes the child's stdin so it observes EOF. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.inner.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            if let Err(err) = sink.shutdown().await {
                trace!(stream = %StdioChannel::Stdin, error = %err, "swallowed stdin close error");
            }
        }
    }
}
