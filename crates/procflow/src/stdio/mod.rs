//! Child stdio adapters
//!
//! Readers eagerly drain the OS pipe into an in-memory [`procflow_pipe::Pipe`]
//! so the child never stalls on a full OS buffer; the writer tolerates
//! writes after exit. Both sides decode/encode text with the configured
//! encoding.

mod lines;
mod reader;
mod writer;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CommandError, Result};

pub use lines::{MergedLine, MergedLines};
pub use reader::OutputReader;
pub use writer::InputWriter;

/// Which of the child's standard streams an adapter or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdioChannel {
    Stdin,
    Stdout,
    Stderr,
}

impl fmt::Display for StdioChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdioChannel::Stdin => write!(f, "standard input"),
            StdioChannel::Stdout => write!(f, "standard output"),
            StdioChannel::Stderr => write!(f, "standard error"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EmptyReason {
    NotRedirected,
    Attached,
}

enum SlotState<T> {
    Empty(EmptyReason),
    Available(T),
    Claimed,
}

/// Holder for one stdio endpoint of a command.
///
/// An endpoint can be handed out any number of times, but a decorator that
/// takes ownership *claims* it, after which every further access fails.
/// Shared between a command and its result snapshots so a later claim is
/// visible to both.
pub(crate) struct StdioSlot<T: Clone> {
    channel: StdioChannel,
    state: Arc<Mutex<SlotState<T>>>,
}

impl<T: Clone> Clone for StdioSlot<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel,
            state: self.state.clone(),
        }
    }
}

impl<T: Clone> StdioSlot<T> {
    pub(crate) fn available(channel: StdioChannel, endpoint: T) -> Self {
        Self {
            channel,
            state: Arc::new(Mutex::new(SlotState::Available(endpoint))),
        }
    }

    pub(crate) fn not_redirected(channel: StdioChannel) -> Self {
        Self {
            channel,
            state: Arc::new(Mutex::new(SlotState::Empty(EmptyReason::NotRedirected))),
        }
    }

    pub(crate) fn attached(channel: StdioChannel) -> Self {
        Self {
            channel,
            state: Arc::new(Mutex::new(SlotState::Empty(EmptyReason::Attached))),
        }
    }

    /// Hands out a handle without claiming the endpoint.
    pub(crate) fn get(&self) -> Result<T> {
        match &*self.state.lock() {
            SlotState::Available(endpoint) => Ok(endpoint.clone()),
            SlotState::Claimed => Err(CommandError::StreamClaimed {
                stream: self.channel,
            }),
            SlotState::Empty(reason) => Err(self.empty_error(*reason)),
        }
    }

    /// Takes exclusive ownership for a decorator; later accesses fail.
    pub(crate) fn claim(&self) -> Result<T> {
        let mut state = self.state.lock();
        match &*state {
            SlotState::Available(endpoint) => {
                let endpoint = endpoint.clone();
                *state = SlotState::Claimed;
                Ok(endpoint)
            }
            SlotState::Claimed => Err(CommandError::StreamClaimed {
                stream: self.channel,
            }),
            SlotState::Empty(reason) => Err(self.empty_error(*reason)),
        }
    }

    fn empty_error(&self, reason: EmptyReason) -> CommandError {
        match reason {
            EmptyReason::NotRedirected => CommandError::StreamNotRedirected {
                stream: self.channel,
            },
            EmptyReason::Attached => CommandError::StreamUnavailableOnAttached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive() {
        let slot = StdioSlot::available(StdioChannel::Stdout, 42u32);
        assert_eq!(slot.get().unwrap(), 42);
        assert_eq!(slot.claim().unwrap(), 42);
        assert!(matches!(
            slot.get(),
            Err(CommandError::StreamClaimed { .. })
        ));
        assert!(matches!(
            slot.claim(),
            Err(CommandError::StreamClaimed { .. })
        ));
    }

    #[test]
    fn empty_slots_report_their_reason() {
        let missing: StdioSlot<u32> = StdioSlot::not_redirected(StdioChannel::Stdin);
        assert!(matches!(
            missing.get(),
            Err(CommandError::StreamNotRedirected { .. })
        ));
        let attached: StdioSlot<u32> = StdioSlot::attached(StdioChannel::Stdout);
        assert!(matches!(
            attached.get(),
            Err(CommandError::StreamUnavailableOnAttached)
        ));
    }
}
