//! # procflow-signals
//!
//! **Purpose**: Deliver console control signals to a single PID, cross-platform
//!
//! On Unix this is a plain PID-targeted `kill`. On Windows, control events
//! are console-group broadcasts: a target sharing our console is signalled by
//! masking the event locally and broadcasting to the group; a target on
//! another console gets the event from an isolated helper process
//! (`procflow-console-kill`) that attaches to that console first.
//!
//! Delivery reports apparent success as a boolean. Repeated calls are safe;
//! no state survives a call.

mod error;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use error::{Result, SignalError};

/// Console control signals that can be routed to a single process.
///
/// `Interrupt` is supported everywhere; `Break` maps to the closest
/// platform-specific sibling and is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    /// CTRL-C on Windows, `SIGINT` on Unix.
    Interrupt,
    /// CTRL-BREAK on Windows, `SIGQUIT` on Unix.
    Break,
}

/// Delivers `signal` to `pid`.
///
/// Returns `Ok(true)` when the signal was apparently delivered, `Ok(false)`
/// when the target is gone or delivery could not be arranged (no permission,
/// missing helper). Errors are reserved for platforms with no delivery
/// mechanism at all.
pub async fn deliver(pid: u32, signal: ControlSignal) -> Result<bool> {
    #[cfg(unix)]
    {
        unix::deliver(pid, signal)
    }
    #[cfg(windows)]
    {
        windows::deliver(pid, signal).await
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Err(SignalError::Unsupported(signal))
    }
}
