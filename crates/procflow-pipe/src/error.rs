//! Error types for pipe operations

use thiserror::Error;

/// Pipe operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipeError {
    /// Read attempted after the reader half was closed
    #[error("pipe reader half is closed")]
    ReaderClosed,

    /// Write attempted after the writer half was closed
    #[error("pipe writer half is closed")]
    WriterClosed,

    /// A read was issued while another read was still in flight
    #[error("another read is already in flight on this pipe")]
    ConcurrentRead,

    /// A write was issued while another write was still in flight
    #[error("another write is already in flight on this pipe")]
    ConcurrentWrite,

    /// The operation's timeout elapsed before it could start
    #[error("pipe operation timed out")]
    Timeout,

    /// The operation's cancellation token fired
    #[error("pipe operation was cancelled")]
    Cancelled,

    /// Buffering the write would exceed the maximum pipe capacity
    #[error("write would exceed the maximum pipe capacity")]
    TooLong,
}

/// Result type for pipe operations
pub type Result<T> = std::result::Result<T, PipeError>;
