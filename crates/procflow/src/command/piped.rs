//! Pipe decorator: `head | tail`
//!
//! Claims the head's standard output and the tail's standard input, copies
//! between them with backpressure, and closes both endpoints together at
//! EOF. Completion order: copy, then head, then tail — the chain's outcome
//! is the tail's result, so `(a | b) | c` and `a | (b | c)` complete
//! identically.

use procflow_pipe::CHUNK_SIZE;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::command::Command;
use crate::error::{CommandError, Result};
use crate::result::CommandResult;

pub(crate) struct PipedCommand {
    head: Box<Command>,
    tail: Box<Command>,
    copy_task: Option<JoinHandle<Result<()>>>,
    cached: Option<Result<CommandResult>>,
}

impl PipedCommand {
    pub(crate) fn chain(head: Command, tail: Command) -> Result<Command> {
        let source = head.stdout_slot().claim()?;
        let target = tail.stdin_slot().claim()?;
        // The copy paces itself to the downstream child instead of
        // buffering the upstream's output without bound.
        source.stop_buffering();

        let copy_task = tokio::spawn(async move {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let outcome = loop {
                match source.read(&mut chunk).await {
                    Ok(0) => break Ok(()),
                    Ok(n) => target.write(&chunk[..n]).await?,
                    Err(err) => break Err(err),
                }
            };
            // Both claimed endpoints close together, whichever side ended
            // the copy.
            source.discard();
            target.close().await;
            trace!("pipe copy finished");
            outcome
        });

        Ok(Command {
            kind: super::CommandKind::Piped(PipedCommand {
                head: Box::new(head),
                tail: Box::new(tail),
                copy_task: Some(copy_task),
                cached: None,
            }),
        })
    }

    pub(crate) fn head(&self) -> &Command {
        &self.head
    }

    pub(crate) fn tail(&self) -> &Command {
        &self.tail
    }

    pub(crate) async fn wait(&mut self) -> Result<CommandResult> {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let copy_outcome = match self.copy_task.as_mut() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(CommandError::Internal(join_err.to_string())),
            },
            None => Ok(()),
        };
        self.copy_task = None;

        // The head's own failures (for example throw-on-error) do not
        // decide the chain's outcome; its exit is still awaited so that
        // chain completion implies every process has exited.
        let head_outcome = Box::pin(self.head.wait()).await;
        if let Err(err) = &head_outcome {
            trace!(error = %err, "pipe head completed with error");
        }

        let outcome = match (Box::pin(self.tail.wait()).await, copy_outcome) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
            (Ok(result), Ok(())) => Ok(result),
        };
        self.cached = Some(outcome.clone());
        outcome
    }
}
