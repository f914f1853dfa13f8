//! Isolated console-signal helper
//!
//! Usage: `procflow-console-kill <pid> <event>`
//!
//! Detaches from whatever console it inherited, attaches to the target
//! process's console, and raises the given control event for that whole
//! group with a self-ignoring handler installed. Exit code 0 means the event
//! was raised; anything else means it was not.

#[cfg(windows)]
fn main() {
    use windows_sys::Win32::System::Console::{
        AttachConsole, FreeConsole, GenerateConsoleCtrlEvent, SetConsoleCtrlHandler,
    };

    let mut args = std::env::args().skip(1);
    let (Some(pid), Some(event)) = (args.next(), args.next()) else {
        eprintln!("usage: procflow-console-kill <pid> <event>");
        std::process::exit(2);
    };
    let (Ok(pid), Ok(event)) = (pid.parse::<u32>(), event.parse::<u32>()) else {
        eprintln!("pid and event must be integers");
        std::process::exit(2);
    };

    // SAFETY: plain console reattachment plus a null handler registration,
    // which makes this helper ignore the event it is about to raise.
    let raised = unsafe {
        FreeConsole();
        if AttachConsole(pid) == 0 {
            std::process::exit(1);
        }
        SetConsoleCtrlHandler(None, 1);
        GenerateConsoleCtrlEvent(event, 0) != 0
    };
    std::process::exit(if raised { 0 } else { 1 });
}

#[cfg(not(windows))]
fn main() {
    // Console groups are a Windows concept; on every other platform signals
    // are PID-targeted and this helper has no job.
    eprintln!("procflow-console-kill does nothing on this platform");
    std::process::exit(2);
}
