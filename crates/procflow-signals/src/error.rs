//! Error types for signal delivery

use thiserror::Error;

use crate::ControlSignal;

/// Signal delivery errors
#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// This platform has no mechanism for routing the signal to one PID
    #[error("no delivery mechanism for {0:?} on this platform")]
    Unsupported(ControlSignal),

    /// The isolated helper process misbehaved in a way that is not a plain
    /// "delivery failed"
    #[error("console-kill helper failed: {0}")]
    Helper(String),
}

/// Result type for signal delivery
pub type Result<T> = std::result::Result<T, SignalError>;
