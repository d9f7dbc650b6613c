use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::StreamError;

/// Default number of lines buffered per output stream.
pub const DEFAULT_LINE_BOUND: usize = 64;

/// Which output stream of the child a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Stdout,
    Stderr,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Stdout => "stdout",
            Origin::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of child output. `seq` counts lines within its origin, from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub origin: Origin,
    pub text: String,
    pub seq: u64,
}

/// What the readers saw once both streams were drained.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub stdout_lines: u64,
    pub stderr_lines: u64,
    pub read_failures: Vec<StreamError>,
}

impl DrainReport {
    pub fn total_lines(&self) -> u64 {
        self.stdout_lines + self.stderr_lines
    }

    pub fn is_clean(&self) -> bool {
        self.read_failures.is_empty()
    }

    fn record(&mut self, summary: ReaderSummary) {
        match summary.origin {
            Origin::Stdout => self.stdout_lines = summary.lines,
            Origin::Stderr => self.stderr_lines = summary.lines,
        }
        if let Some(failure) = summary.failure {
            self.read_failures.push(failure);
        }
    }
}

struct ReaderSummary {
    origin: Origin,
    lines: u64,
    failure: Option<StreamError>,
}

/// Drains stdout and stderr concurrently into one bounded, ordered channel.
#[derive(Debug, Clone, Copy)]
pub struct StreamMultiplexer {
    line_bound: usize,
}

impl Default for StreamMultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_BOUND)
    }
}

impl StreamMultiplexer {
    pub fn new(line_bound: usize) -> Self {
        Self {
            line_bound: line_bound.max(1),
        }
    }

    pub fn channel_capacity(&self) -> usize {
        self.line_bound * 2
    }

    /// Start one reader task per stream.
    ///
    /// The receiver closes once both readers have hit end-of-stream (or were
    /// cancelled); the returned handle then resolves to the `DrainReport`.
    pub fn start<O, E>(
        &self,
        stdout: O,
        stderr: E,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<OutputLine>, JoinHandle<DrainReport>)
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.channel_capacity());

        let out_task = tokio::spawn(read_lines(Origin::Stdout, stdout, tx.clone(), cancel.clone()));
        let err_task = tokio::spawn(read_lines(Origin::Stderr, stderr, tx, cancel));

        let barrier = tokio::spawn(async move {
            let mut report = DrainReport::default();
            for (origin, joined) in [
                (Origin::Stdout, out_task.await),
                (Origin::Stderr, err_task.await),
            ] {
                match joined {
                    Ok(summary) => report.record(summary),
                    Err(e) => report.read_failures.push(StreamError::ReadFailure {
                        origin,
                        message: format!("reader task failed: {}", e),
                    }),
                }
            }
            report
        });

        (rx, barrier)
    }
}

async fn read_lines<R>(
    origin: Origin,
    reader: R,
    tx: mpsc::Sender<OutputLine>,
    cancel: CancellationToken,
) -> ReaderSummary
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut seq = 0u64;
    let mut failure = None;

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                let line = OutputLine {
                    origin,
                    text: decode_line(&buf),
                    seq,
                };
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(line) => sent,
                };
                if sent.is_err() {
                    tracing::debug!(%origin, "line receiver dropped, stopping reader");
                    break;
                }
                seq += 1;
            }
            Err(e) => {
                tracing::warn!(%origin, error = %e, lines = seq, "failed to read child output");
                failure = Some(StreamError::ReadFailure {
                    origin,
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    ReaderSummary {
        origin,
        lines: seq,
        failure,
    }
}

/// Strip the line terminator (`\n` or `\r\n`) and decode lossily.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
