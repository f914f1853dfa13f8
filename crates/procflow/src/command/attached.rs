//! Command attached to an already-running process by pid
//!
//! Attach never owns the target's stdio, so the stream surface is denied
//! wholesale. Exit is observed by polling an existence probe (Unix offers
//! no exit notification for non-children); on Windows the real exit code is
//! read off a retained handle.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::command::Completion;
use crate::error::{CommandError, Result};
use crate::options::Options;
use crate::result::{CommandResult, OutputSnapshot};
use crate::stdio::{InputWriter, OutputReader, StdioChannel, StdioSlot};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct AttachedCommand {
    pid: u32,
    stdin: StdioSlot<InputWriter>,
    stdout: StdioSlot<OutputReader>,
    stderr: StdioSlot<OutputReader>,
    kill_token: CancellationToken,
    completion: Completion,
    lines_taken: Arc<AtomicBool>,
}

impl AttachedCommand {
    /// Attaches to `pid`. Returns `Ok(None)` when no such process exists —
    /// a soft failure, distinct from the precondition error raised when the
    /// options carry launch-time customization that attach cannot honor.
    pub(crate) fn try_attach(pid: u32, options: &Options) -> Result<Option<Self>> {
        if options.customizes_startup() {
            return Err(CommandError::InvalidAttachOptions);
        }
        let Some(watch) = platform::open_watch(pid) else {
            trace!(pid = %pid, "attach target does not exist");
            return Ok(None);
        };
        debug!(pid = %pid, "attached to running process");

        let stdout = StdioSlot::attached(StdioChannel::Stdout);
        let stderr = StdioSlot::attached(StdioChannel::Stderr);
        let kill_token = CancellationToken::new();
        let completion = tokio::spawn(run_attached_completion(
            pid,
            watch,
            kill_token.clone(),
            options.timeout_value(),
            options.cancellation_value(),
            options.throw_on_error_value(),
            OutputSnapshot::new(stdout.clone()),
            OutputSnapshot::new(stderr.clone()),
        ));

        Ok(Some(Self {
            pid,
            stdin: StdioSlot::attached(StdioChannel::Stdin),
            stdout,
            stderr,
            kill_token,
            completion: Completion::new(completion),
            lines_taken: Arc::new(AtomicBool::new(false)),
        }))
    }

    pub(crate) fn process_id(&self) -> u32 {
        self.pid
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

#[allow(clippy::too_many_arguments)]
async fn run_attached_completion(
    pid: u32,
    watch: platform::ProcessWatch,
    kill: CancellationToken,
    timeout: Option<Duration>,
    external: Option<CancellationToken>,
    throw_on_error: bool,
    stdout: OutputSnapshot,
    stderr: OutputSnapshot,
) -> Result<CommandResult> {
    let external = external.unwrap_or_default();

    enum Race {
        Exited(i32),
        Killed,
        Interrupted(CommandError),
    }

    let exit_poll = async {
        loop {
            // Re-probe immediately so a process that exited between the
            // attach probe and this task starting is not missed.
            if let Some(code) = watch.exit_code() {
                break code;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    };
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    let race = if external.is_cancelled() {
        Race::Interrupted(CommandError::Cancelled)
    } else {
        tokio::select! {
            biased;
            code = exit_poll => Race::Exited(code),
            _ = kill.cancelled() => Race::Killed,
            _ = external.cancelled() => Race::Interrupted(CommandError::Cancelled),
            _ = deadline => Race::Interrupted(CommandError::Timeout {
                timeout: timeout.unwrap_or_default(),
            }),
        }
    };

    let mut interruption = None;
    let exit_code = match race {
        Race::Exited(code) => {
            debug!(pid = %pid, exit_code = code, "attached process exited");
            code
        }
        other => {
            if let Race::Interrupted(err) = other {
                interruption = Some(err);
            }
            watch.terminate();
            loop {
                if let Some(code) = watch.exit_code() {
                    break code;
                }
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
            }
        }
    };

    finish(exit_code, throw_on_error, interruption, stdout, stderr)
}

fn finish(
    exit_code: i32,
    throw_on_error: bool,
    interruption: Option<CommandError>,
    stdout: OutputSnapshot,
    stderr: OutputSnapshot,
) -> Result<CommandResult> {
    if let Some(err) = interruption {
        return Err(err);
    }
    if throw_on_error && exit_code != 0 {
        return Err(CommandError::ErrorExitCode { code: exit_code });
    }
    Ok(CommandResult::new(exit_code, stdout, stderr))
}

#[cfg(unix)]
mod platform {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use tracing::trace;

    /// Watch over a non-child process. Unix cannot recover a foreign exit
    /// code, so observed exits report `-1` like any other code-less death.
    pub(super) struct ProcessWatch {
        pid: Pid,
    }

    pub(super) fn open_watch(pid: u32) -> Option<ProcessWatch> {
        let pid = Pid::from_raw(pid as i32);
        probe(pid).then_some(ProcessWatch { pid })
    }

    fn probe(pid: Pid) -> bool {
        match kill(pid, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    impl ProcessWatch {
        pub(super) fn exit_code(&self) -> Option<i32> {
            (!probe(self.pid)).then_some(-1)
        }

        pub(super) fn terminate(&self) {
            if let Err(errno) = kill(self.pid, Signal::SIGKILL) {
                trace!(pid = %self.pid, errno = %errno, "terminate failed (process likely gone)");
            }
        }
    }
}

#[cfg(windows)]
mod platform {
    use tracing::trace;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        PROCESS_TERMINATE, PROCESS_SYNCHRONIZE,
    };

    /// Retains a handle so the exit code stays readable after the process
    /// goes away.
    pub(super) struct ProcessWatch {
        handle: HANDLE,
    }

    // The handle is only ever used behind &self from one task at a time.
    unsafe impl Send for ProcessWatch {}
    unsafe impl Sync for ProcessWatch {}

    pub(super) fn open_watch(pid: u32) -> Option<ProcessWatch> {
        // SAFETY: handle probes and queries only; closed in Drop.
        let handle = unsafe {
            OpenProcess(
                PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_SYNCHRONIZE | PROCESS_TERMINATE,
                0,
                pid,
            )
        };
        if handle.is_null() {
            return None;
        }
        let watch = ProcessWatch { handle };
        // The target may have exited already; a dead-but-openable process
        // still counts as attachable only if it has not been reaped.
        if watch.exit_code().is_some() {
            return None;
        }
        Some(watch)
    }

    impl ProcessWatch {
        pub(super) fn exit_code(&self) -> Option<i32> {
            let mut code: u32 = 0;
            // SAFETY: valid handle owned by self.
            let ok = unsafe { GetExitCodeProcess(self.handle, &mut code) };
            if ok == 0 || code == STILL_ACTIVE as u32 {
                return None;
            }
            Some(code as i32)
        }

        pub(super) fn terminate(&self) {
            // SAFETY: handle was opened with PROCESS_TERMINATE.
            if unsafe { TerminateProcess(self.handle, 1) } == 0 {
                trace!("terminate failed (process likely gone)");
            }
        }
    }

    impl Drop for ProcessWatch {
        fn drop(&mut self) {
            // SAFETY: closing the handle we opened.
            unsafe { CloseHandle(self.handle) };
        }
    }
}
