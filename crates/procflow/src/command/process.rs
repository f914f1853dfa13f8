//! Launched process command
//!
//! Construction order is load-bearing: spawn first, capture the pid and
//! wire the stdio adapters, and only then start the completion task that
//! carries the timeout and cancellation collaborators. Attaching those
//! before the spawn could kill a process that never started.

use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::command::{join_io_tasks, Completion};
use crate::error::{CommandError, Result};
use crate::options::Options;
use crate::result::{CommandResult, OutputSnapshot};
use crate::stdio::{InputWriter, OutputReader, StdioChannel, StdioSlot};

/// Raw child handle shared between a command and its completion task.
///
/// The completion task holds the lock until the process exits, so callers
/// observe the handle only afterwards.
pub type SharedChild = Arc<Mutex<Child>>;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub(crate) struct ProcessCommand {
    pid: std::result::Result<u32, String>,
    stdin: StdioSlot<InputWriter>,
    stdout: StdioSlot<OutputReader>,
    stderr: StdioSlot<OutputReader>,
    kill_token: CancellationToken,
    completion: Completion,
    /// Retained only under `dispose_on_exit(false)`.
    child: Option<SharedChild>,
    lines_taken: Arc<AtomicBool>,
}

impl ProcessCommand {
    pub(crate) fn spawn(program: String, arguments: Vec<String>, options: &Options) -> Result<Self> {
        if program.is_empty() {
            return Err(CommandError::InvalidArgument(
                "program must not be empty".to_string(),
            ));
        }

        let mut start = tokio::process::Command::new(&program);
        apply_arguments(&mut start, &arguments, options);
        start
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        start.creation_flags(CREATE_NO_WINDOW);
        options.apply_start_info(&mut start);

        debug!(
            command = %options.syntax_value().display_line(&program, &arguments),
            "spawning process"
        );
        let mut child = start.spawn().map_err(|err| CommandError::Spawn {
            program: program.clone(),
            message: err.to_string(),
        })?;

        // The pid is captured eagerly, as a value or as the failure to be
        // re-surfaced on access; it outlives the handle either way.
        let pid = child
            .id()
            .ok_or_else(|| "the platform did not report a process id at start".to_string());
        match &pid {
            Ok(pid) => debug!(pid = %pid, program = %program, "process spawned"),
            Err(reason) => warn!(program = %program, reason = %reason, "process spawned without a pid"),
        }

        let encoding = options.encoding_value();
        let mut io_tasks = Vec::new();

        let stdout = match child.stdout.take() {
            Some(os_pipe) => {
                let (reader, drain) = OutputReader::spawn(StdioChannel::Stdout, os_pipe, encoding);
                io_tasks.push(drain);
                StdioSlot::available(StdioChannel::Stdout, reader)
            }
            None => StdioSlot::not_redirected(StdioChannel::Stdout),
        };
        let stderr = match child.stderr.take() {
            Some(os_pipe) => {
                let (reader, drain) = OutputReader::spawn(StdioChannel::Stderr, os_pipe, encoding);
                io_tasks.push(drain);
                StdioSlot::available(StdioChannel::Stderr, reader)
            }
            None => StdioSlot::not_redirected(StdioChannel::Stderr),
        };
        let stdin = match child.stdin.take() {
            Some(os_pipe) => {
                StdioSlot::available(StdioChannel::Stdin, InputWriter::new(os_pipe, encoding))
            }
            None => StdioSlot::not_redirected(StdioChannel::Stdin),
        };

        let dispose_on_exit = options.dispose_on_exit_value();
        let shared: SharedChild = Arc::new(Mutex::new(child));
        let kill_token = CancellationToken::new();

        // Timeout and cancellation join only now, after a successful start.
        let completion = tokio::spawn(run_completion(CompletionInputs {
            child: shared.clone(),
            io_tasks,
            kill: kill_token.clone(),
            timeout: options.timeout_value(),
            external: options.cancellation_value(),
            throw_on_error: options.throw_on_error_value(),
            stdout: OutputSnapshot::new(stdout.clone()),
            stderr: OutputSnapshot::new(stderr.clone()),
        }));

        Ok(Self {
            pid,
            stdin,
            stdout,
            stderr,
            kill_token,
            completion: Completion::new(completion),
            child: (!dispose_on_exit).then_some(shared),
            lines_taken: Arc::new(AtomicBool::new(false)),
        })
    }

    pub(crate) fn process_id(&self) -> Result<u32> {
        self.pid
            .clone()
            .map_err(|reason| CommandError::ProcessIdUnavailable { reason })
    }

    pub(crate) fn process(&self) -> Result<SharedChild> {
        self.child
            .clone()
            .ok_or(CommandError::ProcessNotAccessible)
    }

    pub(crate) fn kill(&self) {
        self.kill_token.cancel();
    }

    pub(crate) async fn wait(&mut self) -> Result<CommandResult> {
        self.completion.wait().await
    }

    pub(crate) fn stdin_slot(&self) -> &StdioSlot<InputWriter> {
        &self.stdin
    }

    pub(crate) fn stdout_slot(&self) -> &StdioSlot<OutputReader> {
        &self.stdout
    }

    pub(crate) fn stderr_slot(&self) -> &StdioSlot<OutputReader> {
        &self.stderr
    }

    pub(crate) fn lines_taken(&self) -> &Arc<AtomicBool> {
        &self.lines_taken
    }
}

fn apply_arguments(
    start: &mut tokio::process::Command,
    arguments: &[String],
    options: &Options,
) {
    #[cfg(windows)]
    {
        use crate::syntax::CommandLineSyntax;
        if options.syntax_value() == CommandLineSyntax::Windows {
            // An explicitly chosen syntax renders the line itself and hands
            // it to the OS verbatim.
            start.raw_arg(options.syntax_value().render(arguments));
            return;
        }
    }
    let _ = options;
    start.args(arguments);
}

struct CompletionInputs {
    child: SharedChild,
    io_tasks: Vec<JoinHandle<Result<()>>>,
    kill: CancellationToken,
    timeout: Option<Duration>,
    external: Option<CancellationToken>,
    throw_on_error: bool,
    stdout: OutputSnapshot,
    stderr: OutputSnapshot,
}

enum ExitRace {
    Exited(std::io::Result<std::process::ExitStatus>),
    Killed,
    Interrupted(CommandError),
}

async fn run_completion(inputs: CompletionInputs) -> Result<CommandResult> {
    let CompletionInputs {
        child,
        io_tasks,
        kill,
        timeout,
        external,
        throw_on_error,
        stdout,
        stderr,
    } = inputs;
    let external = external.unwrap_or_default();

    let mut interruption = None;
    let status = {
        let mut guard = child.lock().await;
        // Pre-check before entering any race: a token cancelled before (or
        // during) startup must surface as cancelled, even if the process
        // managed to exit already.
        let race = if external.is_cancelled() {
            ExitRace::Interrupted(CommandError::Cancelled)
        } else {
            let deadline = async {
                match timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                status = guard.wait() => ExitRace::Exited(status),
                _ = kill.cancelled() => ExitRace::Killed,
                _ = external.cancelled() => ExitRace::Interrupted(CommandError::Cancelled),
                _ = deadline => ExitRace::Interrupted(CommandError::Timeout {
                    timeout: timeout.unwrap_or_default(),
                }),
            }
        };
        match race {
            ExitRace::Exited(status) => status,
            other => {
                if let ExitRace::Interrupted(err) = other {
                    trace!(error = %err, "interrupting process");
                    interruption = Some(err);
                }
                if let Err(err) = guard.start_kill() {
                    trace!(error = %err, "kill after interruption failed (process likely gone)");
                }
                guard.wait().await
            }
        }
        // The exit status is in hand before the guard drops and the handle
        // becomes reachable through `Command::process`.
    };

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(err) => {
            // Exit-status retrieval failing is rare enough to treat as the
            // command failing outright, once the drains are down.
            let _ = join_io_tasks(io_tasks).await;
            return Err(CommandError::Internal(format!(
                "failed to wait for process exit: {err}"
            )));
        }
    };
    drop(child);
    debug!(exit_code = exit_code, "process exited");

    let io_outcome = join_io_tasks(io_tasks).await;

    if let Some(err) = interruption {
        return Err(err);
    }
    io_outcome?;
    if throw_on_error && exit_code != 0 {
        return Err(CommandError::ErrorExitCode { code: exit_code });
    }
    Ok(CommandResult::new(exit_code, stdout, stderr))
}
