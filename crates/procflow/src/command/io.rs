//! Redirection decorator
//!
//! A redirection claims one stdio endpoint, starts a background copy
//! between it and the external source or sink, and wraps the inner command
//! so that completion covers the copy as well. The claimed endpoint is
//! disabled on the wrapped command; everything else passes through.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use procflow_pipe::CHUNK_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::command::Command;
use crate::error::{CommandError, Result};
use crate::result::CommandResult;
use crate::stdio::{InputWriter, OutputReader, StdioChannel};

/// Where a redirected standard input comes from.
pub enum InputSource {
    /// Raw bytes, written as-is.
    Bytes(Vec<u8>),
    /// Text, encoded with the command's configured encoding.
    Text(String),
    /// Contents of a file.
    File(PathBuf),
    /// Any async byte stream.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// Lines, each followed by the platform line terminator.
    Lines(Vec<String>),
}

impl From<Vec<u8>> for InputSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for InputSource {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for InputSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for InputSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<PathBuf> for InputSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for InputSource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<Vec<String>> for InputSource {
    fn from(lines: Vec<String>) -> Self {
        Self::Lines(lines)
    }
}

impl FromIterator<char> for InputSource {
    fn from_iter<I: IntoIterator<Item = char>>(chars: I) -> Self {
        Self::Text(chars.into_iter().collect())
    }
}

impl InputSource {
    /// Wraps an arbitrary async reader.
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::Reader(Box::new(reader))
    }
}

/// Where a redirected output stream goes.
pub enum OutputSink {
    /// Created (truncated) and written as raw bytes.
    File(PathBuf),
    /// Any async byte sink.
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    /// Decoded lines, one element appended per line.
    Lines(Arc<Mutex<Vec<String>>>),
    /// Raw bytes appended to a shared buffer.
    Bytes(Arc<Mutex<Vec<u8>>>),
}

impl From<PathBuf> for OutputSink {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for OutputSink {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<Arc<Mutex<Vec<String>>>> for OutputSink {
    fn from(lines: Arc<Mutex<Vec<String>>>) -> Self {
        Self::Lines(lines)
    }
}

impl From<Arc<Mutex<Vec<u8>>>> for OutputSink {
    fn from(bytes: Arc<Mutex<Vec<u8>>>) -> Self {
        Self::Bytes(bytes)
    }
}

impl OutputSink {
    /// Wraps an arbitrary async writer.
    pub fn writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::Writer(Box::new(writer))
    }
}

pub(crate) struct IoCommand {
    inner: Box<Command>,
    io_task: Option<JoinHandle<Result<()>>>,
    cached: Option<Result<CommandResult>>,
}

impl IoCommand {
    pub(crate) fn redirect_from(command: Command, source: InputSource) -> Result<Command> {
        let writer = command.stdin_slot().claim()?;
        let io_task = tokio::spawn(feed_stdin(writer, source));
        Ok(Self::wrap(command, io_task))
    }

    pub(crate) fn redirect_to(command: Command, sink: OutputSink) -> Result<Command> {
        let reader = command.stdout_slot().claim()?;
        reader.stop_buffering();
        let io_task = tokio::spawn(drain_output(reader, sink));
        Ok(Self::wrap(command, io_task))
    }

    pub(crate) fn redirect_err_to(command: Command, sink: OutputSink) -> Result<Command> {
        let reader = command.stderr_slot().claim()?;
        reader.stop_buffering();
        let io_task = tokio::spawn(drain_output(reader, sink));
        Ok(Self::wrap(command, io_task))
    }

    fn wrap(command: Command, io_task: JoinHandle<Result<()>>) -> Command {
        Command {
            kind: super::CommandKind::Io(IoCommand {
                inner: Box::new(command),
                io_task: Some(io_task),
                cached: None,
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Command {
        &self.inner
    }

    /// Inner completion first, then the I/O task; the inner error wins when
    /// both fail.
    pub(crate) async fn wait(&mut self) -> Result<CommandResult> {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let inner_outcome = Box::pin(self.inner.wait()).await;
        let io_outcome = match self.io_task.as_mut() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(CommandError::Internal(join_err.to_string())),
            },
            None => Ok(()),
        };
        self.io_task = None;
        let outcome = match (inner_outcome, io_outcome) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
            (Ok(result), Ok(())) => Ok(result),
        };
        self.cached = Some(outcome.clone());
        outcome
    }
}

async fn feed_stdin(writer: InputWriter, source: InputSource) -> Result<()> {
    let outcome = feed_stdin_inner(&writer, source).await;
    // The child must observe stdin EOF even when the source failed, or it
    // may never exit and completion would hang on it.
    let _ = writer.flush().await;
    writer.close().await;
    trace!("stdin redirection finished");
    outcome
}

async fn feed_stdin_inner(writer: &InputWriter, source: InputSource) -> Result<()> {
    match source {
        InputSource::Bytes(bytes) => writer.write(&bytes).await,
        InputSource::Text(text) => writer.write_text(&text).await,
        InputSource::Lines(lines) => {
            for line in &lines {
                writer.write_line(line).await?;
            }
            Ok(())
        }
        InputSource::File(path) => {
            let file = tokio::fs::File::open(&path).await.map_err(|err| {
                CommandError::Io {
                    stream: StdioChannel::Stdin,
                    message: format!("{}: {err}", path.display()),
                }
            })?;
            copy_reader_into(file, writer).await
        }
        InputSource::Reader(reader) => copy_reader_into(reader, writer).await,
    }
}

async fn copy_reader_into<R>(mut reader: R, writer: &InputWriter) -> Result<()>
where
    R: AsyncRead + Send + Unpin,
{
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await.map_err(|err| CommandError::Io {
            stream: StdioChannel::Stdin,
            message: err.to_string(),
        })?;
        if n == 0 {
            return Ok(());
        }
        writer.write(&chunk[..n]).await?;
    }
}

async fn drain_output(reader: OutputReader, sink: OutputSink) -> Result<()> {
    let outcome = drain_output_inner(&reader, sink).await;
    // On a failed sink the backpressured pipe would otherwise fill up and
    // wedge the child mid-write; discarding lets it run out.
    reader.discard();
    outcome
}

async fn drain_output_inner(reader: &OutputReader, sink: OutputSink) -> Result<()> {
    let channel = reader.channel();
    match sink {
        OutputSink::File(path) => {
            let file = tokio::fs::File::create(&path).await.map_err(|err| {
                CommandError::Io {
                    stream: channel,
                    message: format!("{}: {err}", path.display()),
                }
            })?;
            copy_into_writer(reader, file).await
        }
        OutputSink::Writer(writer) => copy_into_writer(reader, writer).await,
        OutputSink::Lines(lines) => {
            while let Some(line) = reader.read_line().await? {
                lines.lock().push(line);
            }
            Ok(())
        }
        OutputSink::Bytes(bytes) => {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(());
                }
                bytes.lock().extend_from_slice(&chunk[..n]);
            }
        }
    }
}

async fn copy_into_writer<W>(reader: &OutputReader, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    let channel = reader.channel();
    let io_err = |err: std::io::Error| CommandError::Io {
        stream: channel,
        message: err.to_string(),
    };
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            writer.flush().await.map_err(io_err)?;
            writer.shutdown().await.map_err(io_err)?;
            return Ok(());
        }
        writer.write_all(&chunk[..n]).await.map_err(io_err)?;
    }
}
