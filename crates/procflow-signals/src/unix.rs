//! Unix delivery: signals are PID-targeted natively

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, trace};

use crate::error::Result;
use crate::ControlSignal;

fn map_signal(signal: ControlSignal) -> Signal {
    match signal {
        ControlSignal::Interrupt => Signal::SIGINT,
        ControlSignal::Break => Signal::SIGQUIT,
    }
}

pub(crate) fn deliver(pid: u32, signal: ControlSignal) -> Result<bool> {
    let target = Pid::from_raw(pid as i32);
    match kill(target, map_signal(signal)) {
        Ok(()) => {
            debug!(pid = %pid, signal = ?signal, "delivered signal");
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            trace!(pid = %pid, "target process is gone");
            Ok(false)
        }
        Err(errno) => {
            debug!(pid = %pid, signal = ?signal, errno = %errno, "signal delivery failed");
            Ok(false)
        }
    }
}
