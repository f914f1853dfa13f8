//! Error types for command orchestration

use std::time::Duration;

use procflow_pipe::PipeError;
use thiserror::Error;

use crate::stdio::StdioChannel;

/// Command orchestration errors
///
/// Cloneable so a command's cached completion outcome can be handed to every
/// waiter.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The executable could not be started
    #[error("failed to spawn `{program}`: {message}")]
    Spawn { program: String, message: String },

    /// Non-zero exit surfaced because throw-on-error was set
    #[error("process exited with non-zero code {code}")]
    ErrorExitCode { code: i32 },

    /// The configured timeout elapsed and the process was killed
    #[error("command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The configured cancellation token fired and the process was killed
    #[error("command was cancelled")]
    Cancelled,

    /// OS pipe error while draining or feeding a child stream
    #[error("i/o error on child {stream}: {message}")]
    Io { stream: StdioChannel, message: String },

    /// Error from the in-memory pipe layer
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// Error from the console-signal deliverer
    #[error(transparent)]
    Signal(#[from] procflow_signals::SignalError),

    /// The stream was not redirected when the process was started
    #[error("child {stream} was not redirected at start")]
    StreamNotRedirected { stream: StdioChannel },

    /// The stream has been claimed by a redirection or pipe decorator
    #[error("child {stream} has already been claimed by a redirection")]
    StreamClaimed { stream: StdioChannel },

    /// Attached commands never expose stdio
    #[error("stdio streams are not available on a command attached by pid")]
    StreamUnavailableOnAttached,

    /// The raw handle is released on exit unless dispose-on-exit is off
    #[error("the raw process handle is not accessible when dispose-on-exit is set")]
    ProcessNotAccessible,

    /// Attached commands have no owned process handle
    #[error("the raw process handle is not available on a command attached by pid")]
    ProcessUnavailableOnAttached,

    /// The platform refused to report a process id at start time
    #[error("process id was not captured at start: {reason}")]
    ProcessIdUnavailable { reason: String },

    /// Attach cannot be combined with stream or start-info options
    #[error("attach cannot be combined with encoding or start-info options")]
    InvalidAttachOptions,

    /// The merged output-and-error line sequence is single-shot
    #[error("merged output lines can only be consumed once")]
    LinesAlreadyConsumed,

    /// Caller-supplied argument failed validation
    #[error("{0}")]
    InvalidArgument(String),

    /// A completion or I/O task failed outside the normal error paths
    #[error("internal command task failed: {0}")]
    Internal(String),
}

/// Result type for command operations
pub type Result<T> = std::result::Result<T, CommandError>;
