//! # procflow
//!
//! **Purpose**: Launch and orchestrate child processes with rich stdio control
//!
//! A [`Shell`] carries default options and materializes [`Command`] handles;
//! commands expose their stdio as async readers/writers, compose through
//! redirection and piping decorators, and resolve to a single
//! [`CommandResult`] once the process has exited *and* every attached I/O
//! task has drained.
//!
//! ## Features
//!
//! - **Captured stdio**: Output is drained eagerly so children never stall
//!   on a full OS pipe buffer
//! - **Composable piping**: `a | b` chains commands; redirection ties files,
//!   streams, and collections to either end
//! - **Deterministic teardown**: Timeouts and cancellation kill the child
//!   and surface as typed errors
//! - **Console signals**: Graceful interrupt delivery to a single pid,
//!   cross-platform
//!
//! ## Usage
//!
//! ```rust,no_run
//! use procflow::Shell;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let shell = Shell::default();
//! let mut chain = (shell.run("printf", ["one\\ntwo\\n"])? | shell.run("sort", ["-r"])?)
//!     .redirect_to(std::path::Path::new("sorted.txt"))?;
//! let result = chain.wait().await?;
//! assert!(result.success());
//! # Ok(())
//! # }
//! ```

mod command;
mod error;
mod options;
mod result;
mod shell;
mod stdio;
mod syntax;

pub use command::{Command, InputSource, OutputSink, SharedChild};
pub use error::{CommandError, Result};
pub use options::Options;
pub use result::CommandResult;
pub use shell::Shell;
pub use stdio::{InputWriter, MergedLine, MergedLines, OutputReader, StdioChannel};
pub use syntax::{quote_argument, split_command_line, CommandLineSyntax};

pub use procflow_signals::ControlSignal;
pub use tokio_util::sync::CancellationToken;

/// Re-export of the buffering layer for callers that want to wire pipes
/// directly.
pub use procflow_pipe as pipe;
