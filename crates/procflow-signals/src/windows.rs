//! Windows delivery: console control events are group broadcasts
//!
//! Two strategies. A target attached to our own console is signalled by
//! registering a local handler that swallows the event, broadcasting
//! CTRL-C/CTRL-BREAK to the whole group, and waiting for our handler to
//! observe it before unregistering. A target on a different console needs an
//! isolated process: the sibling `procflow-console-kill` helper attaches to
//! the target's console and raises the event there.

use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{CloseHandle, BOOL};
use windows_sys::Win32::System::Console::{
    GenerateConsoleCtrlEvent, GetConsoleProcessList, SetConsoleCtrlHandler, CTRL_BREAK_EVENT,
    CTRL_C_EVENT,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcessId, OpenProcess, PROCESS_SYNCHRONIZE};

use crate::error::Result;
use crate::ControlSignal;

/// How long we wait for our own handler to observe the broadcast event
/// before assuming delivery failed.
const OBSERVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Serializes all same-console signalling: the console handler list is
/// process-wide state.
static SIGNAL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Handler coordination. The handler runs on a Windows-injected thread.
static EXPECTED_EVENT: AtomicU32 = AtomicU32::new(u32::MAX);
static SWALLOW_LOCALLY: AtomicBool = AtomicBool::new(false);
static OBSERVED: Lazy<Semaphore> = Lazy::new(|| Semaphore::new(0));

fn map_event(signal: ControlSignal) -> u32 {
    match signal {
        ControlSignal::Interrupt => CTRL_C_EVENT,
        ControlSignal::Break => CTRL_BREAK_EVENT,
    }
}

pub(crate) async fn deliver(pid: u32, signal: ControlSignal) -> Result<bool> {
    if !process_exists(pid) {
        return Ok(false);
    }
    if shares_our_console(pid) {
        deliver_same_console(pid, map_event(signal)).await
    } else {
        deliver_via_helper(pid, map_event(signal)).await
    }
}

fn process_exists(pid: u32) -> bool {
    // SAFETY: plain handle probe; the handle is closed before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_SYNCHRONIZE, 0, pid);
        if handle.is_null() {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

fn shares_our_console(pid: u32) -> bool {
    let mut pids = vec![0u32; 64];
    loop {
        // SAFETY: the buffer length is passed alongside the pointer.
        let count =
            unsafe { GetConsoleProcessList(pids.as_mut_ptr(), pids.len() as u32) } as usize;
        if count == 0 {
            // We have no console; nothing can share it.
            return false;
        }
        if count <= pids.len() {
            pids.truncate(count);
            return pids.contains(&pid);
        }
        pids.resize(count, 0);
    }
}

/// Console control handler registered for the duration of one delivery.
/// Observes the broadcast and, unless the target is this very process,
/// swallows it locally.
unsafe extern "system" fn observe_and_mask(ctrl_type: u32) -> BOOL {
    if ctrl_type == EXPECTED_EVENT.load(Ordering::SeqCst) {
        OBSERVED.add_permits(1);
        return SWALLOW_LOCALLY.load(Ordering::SeqCst) as BOOL;
    }
    0
}

async fn deliver_same_console(pid: u32, event: u32) -> Result<bool> {
    let _guard = SIGNAL_LOCK.lock().await;

    // Drain any stale observation left by a timed-out prior delivery.
    while let Ok(permit) = OBSERVED.try_acquire() {
        permit.forget();
    }
    EXPECTED_EVENT.store(event, Ordering::SeqCst);
    // SAFETY: the current process id has no preconditions.
    let target_is_self = pid == unsafe { GetCurrentProcessId() };
    SWALLOW_LOCALLY.store(!target_is_self, Ordering::SeqCst);

    // SAFETY: registering a valid fn pointer; unregistered below.
    if unsafe { SetConsoleCtrlHandler(Some(observe_and_mask), 1) } == 0 {
        warn!(pid = %pid, "failed to register console control handler");
        return Ok(false);
    }

    // SAFETY: group 0 broadcasts to our own console group.
    let raised = unsafe { GenerateConsoleCtrlEvent(event, 0) } != 0;
    let mut delivered = raised;
    if raised {
        match tokio::time::timeout(OBSERVATION_TIMEOUT, OBSERVED.acquire()).await {
            Ok(Ok(permit)) => permit.forget(),
            Ok(Err(_)) | Err(_) => {
                warn!(pid = %pid, "console event was raised but never observed locally");
                delivered = false;
            }
        }
    }

    EXPECTED_EVENT.store(u32::MAX, Ordering::SeqCst);
    // SAFETY: symmetric unregister of the handler registered above.
    unsafe { SetConsoleCtrlHandler(Some(observe_and_mask), 0) };
    debug!(pid = %pid, event = event, delivered = delivered, "same-console delivery finished");
    Ok(delivered)
}

/// Signals a process on a foreign console by running the sibling helper
/// binary, which attaches to that console and raises the event in isolation.
async fn deliver_via_helper(pid: u32, event: u32) -> Result<bool> {
    let Some(helper) = helper_path() else {
        warn!(pid = %pid, "console-kill helper binary not found next to the current executable");
        return Ok(false);
    };
    let status = tokio::process::Command::new(&helper)
        .arg(pid.to_string())
        .arg(event.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|err| crate::SignalError::Helper(err.to_string()))?;
    debug!(pid = %pid, event = event, code = ?status.code(), "helper delivery finished");
    Ok(status.success())
}

fn helper_path() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let candidate = exe.parent()?.join("procflow-console-kill.exe");
    candidate.is_file().then_some(candidate)
}
