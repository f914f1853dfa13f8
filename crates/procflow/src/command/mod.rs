//! Command handles and decorators
//!
//! A command is a tree: a process (or attached) leaf, optionally wrapped by
//! redirection and pipe decorators. Each decorator exclusively owns its
//! inner command, so the tree needs no back-references and teardown is plain
//! drop order.

mod attached;
mod io;
mod piped;
mod process;

use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use procflow_signals::ControlSignal;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{CommandError, Result};
use crate::result::CommandResult;
use crate::stdio::{InputWriter, MergedLines, OutputReader, StdioSlot};

pub(crate) use attached::AttachedCommand;
pub(crate) use process::ProcessCommand;

pub use io::{InputSource, OutputSink};
pub use process::SharedChild;

use io::IoCommand;
use piped::PipedCommand;

/// Handle to a running (or attached) child process, or a decorated
/// composition of them.
///
/// Obtained from [`Shell::run`] or [`Shell::try_attach`]; composed with
/// [`redirect_from`](Command::redirect_from),
/// [`redirect_to`](Command::redirect_to), and
/// [`pipe_to`](Command::pipe_to) (also spelled `a | b`).
///
/// [`Shell::run`]: crate::Shell::run
/// [`Shell::try_attach`]: crate::Shell::try_attach
pub struct Command {
    kind: CommandKind,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command").finish_non_exhaustive()
    }
}

enum CommandKind {
    Process(ProcessCommand),
    Attached(AttachedCommand),
    Io(IoCommand),
    Piped(PipedCommand),
}

impl Command {
    pub(crate) fn from_process(process: ProcessCommand) -> Self {
        Self {
            kind: CommandKind::Process(process),
        }
    }

    pub(crate) fn from_attached(attached: AttachedCommand) -> Self {
        Self {
            kind: CommandKind::Attached(attached),
        }
    }

    /// The primary process id, captured at start time.
    ///
    /// Remains available after exit and under dispose-on-exit. Fails only
    /// when the platform refused to report an id at start, with the
    /// captured reason.
    pub fn process_id(&self) -> Result<u32> {
        match &self.kind {
            CommandKind::Process(process) => process.process_id(),
            CommandKind::Attached(attached) => Ok(attached.process_id()),
            CommandKind::Io(io) => io.inner().process_id(),
            CommandKind::Piped(piped) => piped.head().process_id(),
        }
    }

    /// Every process id in this command tree, head of a pipe chain first.
    pub fn process_ids(&self) -> Result<Vec<u32>> {
        match &self.kind {
            CommandKind::Piped(piped) => {
                let mut ids = piped.head().process_ids()?;
                ids.extend(piped.tail().process_ids()?);
                Ok(ids)
            }
            CommandKind::Io(io) => io.inner().process_ids(),
            _ => Ok(vec![self.process_id()?]),
        }
    }

    /// The raw child handle, shared with the completion task.
    ///
    /// The completion task holds the handle's lock until the process exits,
    /// and the handle is only retained at all when `dispose_on_exit(false)`
    /// was configured; with the default options this fails with a
    /// precondition error.
    pub fn process(&self) -> Result<SharedChild> {
        match &self.kind {
            CommandKind::Process(process) => process.process(),
            CommandKind::Attached(_) => Err(CommandError::ProcessUnavailableOnAttached),
            CommandKind::Io(io) => io.inner().process(),
            CommandKind::Piped(piped) => piped.head().process(),
        }
    }

    /// Every raw child handle in this command tree.
    pub fn processes(&self) -> Result<Vec<SharedChild>> {
        match &self.kind {
            CommandKind::Piped(piped) => {
                let mut handles = piped.head().processes()?;
                handles.extend(piped.tail().processes()?);
                Ok(handles)
            }
            CommandKind::Io(io) => io.inner().processes(),
            _ => Ok(vec![self.process()?]),
        }
    }

    /// Writer over the child's standard input.
    pub fn standard_input(&self) -> Result<InputWriter> {
        self.stdin_slot().get()
    }

    /// Reader over the child's standard output.
    pub fn standard_output(&self) -> Result<OutputReader> {
        self.stdout_slot().get()
    }

    /// Reader over the child's standard error.
    pub fn standard_error(&self) -> Result<OutputReader> {
        self.stderr_slot().get()
    }

    /// Waits for completion: process exit *and* every attached I/O task.
    ///
    /// Resolves exactly once; later calls return the cached outcome. The
    /// outcome is an error when the command timed out, was cancelled, hit
    /// an I/O failure, or exited non-zero under `throw_on_error`.
    pub async fn wait(&mut self) -> Result<CommandResult> {
        match &mut self.kind {
            CommandKind::Process(process) => process.wait().await,
            CommandKind::Attached(attached) => attached.wait().await,
            CommandKind::Io(io) => io.wait().await,
            CommandKind::Piped(piped) => piped.wait().await,
        }
    }

    /// [`wait`](Command::wait), by another name for call sites that read
    /// better as a query.
    pub async fn result(&mut self) -> Result<CommandResult> {
        self.wait().await
    }

    /// Best-effort terminate. Idempotent, never fails, and safe to call
    /// whether or not the process is still running.
    pub fn kill(&self) {
        match &self.kind {
            CommandKind::Process(process) => process.kill(),
            CommandKind::Attached(attached) => attached.kill(),
            CommandKind::Io(io) => io.inner().kill(),
            CommandKind::Piped(piped) => {
                piped.head().kill();
                piped.tail().kill();
            }
        }
    }

    /// Graceful termination: delivers the interrupt signal, waits up to
    /// `grace`, then falls back to [`kill`](Command::kill).
    pub async fn shutdown(&mut self, grace: Duration) -> Result<CommandResult> {
        let _ = self.try_signal(ControlSignal::Interrupt).await;
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(grace = ?grace, "grace period elapsed, killing");
                self.kill();
                self.wait().await
            }
        }
    }

    /// Delivers a console control signal to the primary process. Returns
    /// whether delivery apparently succeeded.
    pub async fn try_signal(&self, signal: ControlSignal) -> Result<bool> {
        let pid = self.process_id()?;
        Ok(procflow_signals::deliver(pid, signal).await?)
    }

    /// Feeds the child's standard input from `source` in the background and
    /// returns a command whose completion also covers that copy. The stdin
    /// endpoint is claimed: later accesses fail.
    pub fn redirect_from(self, source: impl Into<InputSource>) -> Result<Command> {
        IoCommand::redirect_from(self, source.into())
    }

    /// Copies the child's standard output into `sink` in the background,
    /// claiming the stdout endpoint.
    pub fn redirect_to(self, sink: impl Into<OutputSink>) -> Result<Command> {
        IoCommand::redirect_to(self, sink.into())
    }

    /// Copies the child's standard error into `sink` in the background,
    /// claiming the stderr endpoint.
    pub fn redirect_err_to(self, sink: impl Into<OutputSink>) -> Result<Command> {
        IoCommand::redirect_err_to(self, sink.into())
    }

    /// Chains this command's standard output into `tail`'s standard input.
    ///
    /// The copy is backpressured, both claimed endpoints close together at
    /// EOF, and the returned command completes when the copy, this command,
    /// and `tail` have all finished (with `tail`'s result as the outcome).
    /// Also available as the `|` operator.
    pub fn pipe_to(self, tail: Command) -> Result<Command> {
        PipedCommand::chain(self, tail)
    }

    /// Single-shot merged view of standard output and standard error as
    /// lines, ordered by availability (standard output first on ties).
    ///
    /// Claims both output endpoints; calling this twice fails.
    pub fn output_and_error_lines(&self) -> Result<MergedLines> {
        if self.lines_taken().swap(true, Ordering::SeqCst) {
            return Err(CommandError::LinesAlreadyConsumed);
        }
        let claimed = self
            .stdout_slot()
            .claim()
            .and_then(|stdout| Ok((stdout, self.stderr_slot().claim()?)));
        match claimed {
            Ok((stdout, stderr)) => Ok(MergedLines::new(stdout, stderr)),
            Err(err) => {
                // A failed claim is not a consumption.
                self.lines_taken().store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn stdin_slot(&self) -> &StdioSlot<InputWriter> {
        match &self.kind {
            CommandKind::Process(process) => process.stdin_slot(),
            CommandKind::Attached(attached) => attached.stdin_slot(),
            CommandKind::Io(io) => io.inner().stdin_slot(),
            CommandKind::Piped(piped) => piped.head().stdin_slot(),
        }
    }

    fn stdout_slot(&self) -> &StdioSlot<OutputReader> {
        match &self.kind {
            CommandKind::Process(process) => process.stdout_slot(),
            CommandKind::Attached(attached) => attached.stdout_slot(),
            CommandKind::Io(io) => io.inner().stdout_slot(),
            CommandKind::Piped(piped) => piped.tail().stdout_slot(),
        }
    }

    fn stderr_slot(&self) -> &StdioSlot<OutputReader> {
        match &self.kind {
            CommandKind::Process(process) => process.stderr_slot(),
            CommandKind::Attached(attached) => attached.stderr_slot(),
            CommandKind::Io(io) => io.inner().stderr_slot(),
            CommandKind::Piped(piped) => piped.tail().stderr_slot(),
        }
    }

    fn lines_taken(&self) -> &Arc<AtomicBool> {
        match &self.kind {
            CommandKind::Process(process) => process.lines_taken(),
            CommandKind::Attached(attached) => attached.lines_taken(),
            CommandKind::Io(io) => io.inner().lines_taken(),
            CommandKind::Piped(piped) => piped.tail().lines_taken(),
        }
    }
}

/// `head | tail` builds a [piped command](Command::pipe_to).
///
/// # Panics
///
/// Panics when either side's endpoint was already claimed, which is a
/// programming error in the composition (the method form reports it as a
/// `Result` instead).
impl BitOr for Command {
    type Output = Command;

    fn bitor(self, tail: Command) -> Command {
        match self.pipe_to(tail) {
            Ok(piped) => piped,
            Err(err) => panic!("cannot pipe commands: {err}"),
        }
    }
}

/// Shared future-with-cache for a command's single completion.
pub(crate) struct Completion {
    handle: Option<JoinHandle<Result<CommandResult>>>,
    cached: Option<Result<CommandResult>>,
}

impl Completion {
    pub(crate) fn new(handle: JoinHandle<Result<CommandResult>>) -> Self {
        Self {
            handle: Some(handle),
            cached: None,
        }
    }

    /// Resolves the completion exactly once and replays the cached outcome
    /// afterwards. Cancel-safe: an abandoned wait leaves the handle intact.
    pub(crate) async fn wait(&mut self) -> Result<CommandResult> {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let outcome = match self.handle.as_mut() {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(CommandError::Internal(join_err.to_string())),
            },
            None => Err(CommandError::Internal(
                "completion handle missing".to_string(),
            )),
        };
        self.handle = None;
        self.cached = Some(outcome.clone());
        outcome
    }
}

/// Joins a set of background I/O tasks, keeping the first error.
pub(crate) async fn join_io_tasks(tasks: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    let mut first_error = None;
    for task in tasks {
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(CommandError::Internal(join_err.to_string())),
        };
        if let Err(err) = outcome {
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
