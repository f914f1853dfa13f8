//! Final command result
//!
//! Output text is materialized lazily: the first access drains the backing
//! reader once and every later access (through this result or a decorator's
//! copy of it) sees the same snapshot.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::Result;
use crate::stdio::{OutputReader, StdioSlot};

/// Lazily materialized text of one output stream, shared across every
/// result handle for the same command.
#[derive(Clone)]
pub(crate) struct OutputSnapshot {
    slot: StdioSlot<OutputReader>,
    cell: Arc<OnceCell<String>>,
}

impl OutputSnapshot {
    pub(crate) fn new(slot: StdioSlot<OutputReader>) -> Self {
        Self {
            slot,
            cell: Arc::new(OnceCell::new()),
        }
    }

    async fn text(&self) -> Result<String> {
        self.cell
            .get_or_try_init(|| async {
                let reader = self.slot.get()?;
                reader.read_to_string().await
            })
            .await
            .cloned()
    }
}

/// Immutable outcome of a completed command.
#[derive(Clone)]
pub struct CommandResult {
    exit_code: i32,
    stdout: OutputSnapshot,
    stderr: OutputSnapshot,
}

impl CommandResult {
    pub(crate) fn new(exit_code: i32, stdout: OutputSnapshot, stderr: OutputSnapshot) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
        }
    }

    /// The process exit code. A process that died without reporting one
    /// (for example, killed) yields `-1`; operating systems that truncate
    /// exit codes to eight bits report the low byte instead.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// True iff the exit code is zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Full standard output text, captured on first access.
    ///
    /// Fails with a precondition error if the stream was claimed by a
    /// redirection or pipe, or was never redirected.
    pub async fn standard_output(&self) -> Result<String> {
        self.stdout.text().await
    }

    /// Full standard error text, captured on first access.
    pub async fn standard_error(&self) -> Result<String> {
        self.stderr.text().await
    }
}

impl std::fmt::Debug for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandResult")
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}
