//! # procflow-pipe
//!
//! **Purpose**: Bounded in-memory byte pipe for decoupling producers from consumers
//!
//! Provides the buffering layer between a child process's OS pipes and their
//! in-process consumers: an unbounded capture mode that keeps the child from
//! stalling on a full OS pipe buffer, and a fixed-length mode that applies
//! backpressure so hand-piped data does not accumulate in memory.
//!
//! ## Features
//!
//! - **Async read/write**: Every operation takes an optional timeout and a
//!   cancellation token
//! - **Backpressure**: Fixed-length mode blocks writers once the buffer fills
//! - **Half-close**: Either side may close first; teardown is safe both ways
//! - **No partial writes**: A blocked write either fails before any byte is
//!   accepted or completes in full
//!
//! ## Usage
//!
//! ```rust,no_run
//! use procflow_pipe::Pipe;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipe = Pipe::new();
//! let writer = pipe.writer();
//! let reader = pipe.reader();
//!
//! writer.write(b"hello").await?;
//! writer.close();
//!
//! let mut buf = [0u8; 16];
//! let n = reader.read(&mut buf).await?;
//! assert_eq!(&buf[..n], b"hello");
//! # Ok(())
//! # }
//! ```

mod buffer;
mod error;
mod pipe;

pub use error::{PipeError, Result};
pub use pipe::{Pipe, PipeReader, PipeWriter};

/// Chunk size used by drain loops copying out of OS pipes.
pub const CHUNK_SIZE: usize = 4096;

/// Resident capacity ceiling in fixed-length mode.
///
/// Once the reader catches up, an over-grown buffer shrinks back to this.
pub const MAX_STABLE_CAPACITY: usize = 2 * CHUNK_SIZE;
