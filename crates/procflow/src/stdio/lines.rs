//! Merged stdout + stderr line sequence
//!
//! Two pump tasks feed one-line-deep channels; the merger yields whichever
//! stream has a line available first, preferring standard output when both
//! are ready. Once one stream ends the other is drained to completion.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::stdio::{OutputReader, StdioChannel};

/// One line of merged output, tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedLine {
    pub channel: StdioChannel,
    pub text: String,
}

/// Single-shot merged line sequence over a command's output and error
/// streams. Obtained from [`Command::output_and_error_lines`].
///
/// [`Command::output_and_error_lines`]: crate::Command::output_and_error_lines
#[derive(Debug)]
pub struct MergedLines {
    stdout: LineSource,
    stderr: LineSource,
}

#[derive(Debug)]
struct LineSource {
    rx: mpsc::Receiver<Result<String>>,
    done: bool,
    _pump: JoinHandle<()>,
}

impl LineSource {
    fn start(reader: OutputReader) -> Self {
        // Depth 1: the pump holds at most the one line waiting its turn,
        // so neither stream races ahead of the consumer.
        let (tx, rx) = mpsc::channel(1);
        let pump = tokio::spawn(async move {
            loop {
                match reader.read_line().await {
                    Ok(Some(line)) => {
                        if tx.send(Ok(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });
        Self {
            rx,
            done: false,
            _pump: pump,
        }
    }
}

impl MergedLines {
    pub(crate) fn new(stdout: OutputReader, stderr: OutputReader) -> Self {
        Self {
            stdout: LineSource::start(stdout),
            stderr: LineSource::start(stderr),
        }
    }

    /// The next merged line, or `None` when both streams have ended.
    pub async fn next(&mut self) -> Option<Result<MergedLine>> {
        loop {
            match (self.stdout.done, self.stderr.done) {
                (false, false) => {
                    tokio::select! {
                        biased;
                        out = self.stdout.rx.recv() => match out {
                            Some(item) => return Some(tag(StdioChannel::Stdout, item)),
                            None => self.stdout.done = true,
                        },
                        err = self.stderr.rx.recv() => match err {
                            Some(item) => return Some(tag(StdioChannel::Stderr, item)),
                            None => self.stderr.done = true,
                        },
                    }
                }
                (false, true) => match self.stdout.rx.recv().await {
                    Some(item) => return Some(tag(StdioChannel::Stdout, item)),
                    None => self.stdout.done = true,
                },
                (true, false) => match self.stderr.rx.recv().await {
                    Some(item) => return Some(tag(StdioChannel::Stderr, item)),
                    None => self.stderr.done = true,
                },
                (true, true) => return None,
            }
        }
    }

    /// Collects every remaining line.
    pub async fn collect(mut self) -> Result<Vec<MergedLine>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next().await {
            lines.push(line?);
        }
        Ok(lines)
    }
}

fn tag(channel: StdioChannel, item: Result<String>) -> Result<MergedLine> {
    item.map(|text| MergedLine { channel, text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader_over(data: &str) -> OutputReader {
        let (reader, _drain) = OutputReader::spawn(
            StdioChannel::Stdout,
            Cursor::new(data.as_bytes().to_vec()),
            encoding_rs::UTF_8,
        );
        reader
    }

    #[tokio::test]
    async fn merges_all_lines_preserving_per_stream_order() {
        let out = reader_over("o1\no2\no3\n");
        let err = reader_over("e1\ne2\n");
        let merged = MergedLines::new(out, err).collect().await.unwrap();

        let outs: Vec<&str> = merged
            .iter()
            .filter(|l| l.channel == StdioChannel::Stdout)
            .map(|l| l.text.as_str())
            .collect();
        let errs: Vec<&str> = merged
            .iter()
            .filter(|l| l.channel == StdioChannel::Stderr)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(outs, ["o1", "o2", "o3"]);
        assert_eq!(errs, ["e1", "e2"]);
        assert_eq!(merged.len(), 5);
    }

    #[tokio::test]
    async fn drains_the_survivor_after_one_side_ends() {
        let out = reader_over("");
        let err = reader_over("only\nerrors\nhere\n");
        let merged = MergedLines::new(out, err).collect().await.unwrap();
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().all(|l| l.channel == StdioChannel::Stderr));
    }
}
