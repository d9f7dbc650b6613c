use std::collections::VecDeque;
use std::time::Duration;

use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::StreamError;

use super::event::StreamEvent;
use super::mux::{DEFAULT_LINE_BOUND, DrainReport, OutputLine, StreamMultiplexer};
use super::process::{CommandSpec, ProcessOutcome, ProcessRunner, RunningProcess};
use super::sse::{SseResponder, SseResponse};

/// Output lines (across both origins) attached to an `ExecutionFailure`.
pub const TAIL_LINES: usize = 20;

/// How long a timed-out run waits for a client to accept the `error` event.
const TERMINAL_WRITE_GRACE: Duration = Duration::from_secs(2);

/// Per-request limits for a bridged run.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub line_bound: usize,
    pub timeout: Option<Duration>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            line_bound: DEFAULT_LINE_BOUND,
            timeout: Some(Duration::from_secs(900)),
        }
    }
}

/// How a bridged run ended.
#[derive(Debug)]
pub enum BridgeOutcome {
    /// `complete` was written.
    Completed,
    /// `error` was written.
    Failed(StreamError),
    /// The client went away; the process was killed and nothing more was written.
    Disconnected,
}

/// A launched run: the response to hand back to axum plus the task driving it.
pub struct ActiveStream {
    pub response: SseResponse,
    pub task: JoinHandle<BridgeOutcome>,
}

/// Everything a run produced, for callers that want a single reply instead of a stream.
#[derive(Debug)]
pub struct CollectedOutput {
    pub lines: Vec<OutputLine>,
    pub outcome: ProcessOutcome,
    pub report: DrainReport,
}

impl CollectedOutput {
    pub fn succeeded(&self) -> bool {
        self.outcome.success() && self.report.is_clean()
    }

    pub fn combined(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs external commands and forwards their output as stream events.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamBridge {
    settings: BridgeSettings,
}

enum Interrupt {
    Disconnected,
    TimedOut,
    Failed(StreamError),
}

impl Interrupt {
    fn from_write(err: StreamError) -> Self {
        match err {
            StreamError::ClientDisconnect => Interrupt::Disconnected,
            other => Interrupt::Failed(other),
        }
    }
}

impl StreamBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> BridgeSettings {
        self.settings
    }

    /// Spawn `spec` and start streaming it.
    ///
    /// Start and pipe failures are returned here so the caller can answer with
    /// a plain error response before any event-stream headers go out.
    pub fn launch(&self, spec: &CommandSpec, label: &str) -> Result<ActiveStream, StreamError> {
        let mut process = ProcessRunner::spawn(spec)?;
        let (stdout, stderr) = process.take_pipes()?;

        let cancel = CancellationToken::new();
        let mux = StreamMultiplexer::new(self.settings.line_bound);
        let (responder, response) = SseResponder::open(mux.channel_capacity(), cancel.clone());

        let run = BridgeRun {
            process,
            stdout,
            stderr,
            responder,
            mux,
            cancel,
            timeout: self.settings.timeout,
            label: label.to_string(),
        };
        let task = tokio::spawn(run.drive());

        Ok(ActiveStream { response, task })
    }

    /// Run `spec` to completion and gather its output.
    pub async fn collect(&self, spec: &CommandSpec) -> Result<CollectedOutput, StreamError> {
        let mut process = ProcessRunner::spawn(spec)?;
        let (stdout, stderr) = process.take_pipes()?;

        let cancel = CancellationToken::new();
        let mux = StreamMultiplexer::new(self.settings.line_bound);
        let (mut rx, drain) = mux.start(stdout, stderr, cancel.clone());
        let limit = self.settings.timeout.unwrap_or_default();
        let deadline = self.settings.timeout.map(|limit| Instant::now() + limit);

        let mut lines = Vec::new();
        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => lines.push(line),
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    cancel.cancel();
                    process.terminate().await;
                    let _ = drain.await;
                    tracing::warn!(program = spec.program(), ?limit, "process timed out");
                    return Err(StreamError::Timeout(limit));
                }
            }
        }

        let report = join_drain(drain).await;
        // Closed pipes do not mean the process is done.
        let outcome = tokio::select! {
            exit = process.wait() => exit?,
            _ = sleep_until(deadline) => {
                process.terminate().await;
                tracing::warn!(program = spec.program(), ?limit, "process outlived its output, timed out");
                return Err(StreamError::Timeout(limit));
            }
        };
        Ok(CollectedOutput {
            lines,
            outcome,
            report,
        })
    }
}

struct BridgeRun {
    process: RunningProcess,
    stdout: ChildStdout,
    stderr: ChildStderr,
    responder: SseResponder,
    mux: StreamMultiplexer,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    label: String,
}

impl BridgeRun {
    async fn drive(self) -> BridgeOutcome {
        let BridgeRun {
            mut process,
            stdout,
            stderr,
            mut responder,
            mux,
            cancel,
            timeout,
            label,
        } = self;
        let pid = process.id();

        if responder.start(format!("Starting {}...", label)).await.is_err() {
            process.terminate().await;
            tracing::info!(?pid, %label, "client left before the stream started");
            return BridgeOutcome::Disconnected;
        }

        let (mut lines, drain) = mux.start(stdout, stderr, cancel.clone());
        let limit = timeout.unwrap_or_default();
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);

        let interrupt = loop {
            tokio::select! {
                biased;
                _ = responder.disconnected() => break Some(Interrupt::Disconnected),
                line = lines.recv() => match line {
                    Some(line) => {
                        if tail.len() == TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line.text.clone());
                        // A stalled client blocks this write; the deadline still applies.
                        let sent = tokio::select! {
                            sent = responder.chunk(&line) => sent.map_err(Interrupt::from_write),
                            _ = sleep_until(deadline) => Err(Interrupt::TimedOut),
                        };
                        if let Err(interrupt) = sent {
                            break Some(interrupt);
                        }
                    }
                    None => break None,
                },
                _ = sleep_until(deadline) => break Some(Interrupt::TimedOut),
            }
        };

        // Both readers are done (or about to be) past this point.
        let outcome = match interrupt {
            Some(interrupt) => {
                cancel.cancel();
                process.terminate().await;
                let _ = join_drain(drain).await;
                match interrupt {
                    Interrupt::Disconnected => {
                        responder.abort();
                        BridgeOutcome::Disconnected
                    }
                    Interrupt::TimedOut => {
                        tracing::warn!(?pid, %label, ?limit, "process timed out, terminated");
                        fail_timed_out(&mut responder, limit).await
                    }
                    Interrupt::Failed(e) => fail(&mut responder, e).await,
                }
            }
            None => {
                let report = join_drain(drain).await;
                let exit = tokio::select! {
                    biased;
                    _ = responder.disconnected() => Err(Interrupt::Disconnected),
                    exit = process.wait() => Ok(exit),
                    _ = sleep_until(deadline) => Err(Interrupt::TimedOut),
                };
                match exit {
                    Ok(Ok(exit)) => {
                        let tail: Vec<String> = tail.into_iter().collect();
                        settle(&mut responder, &label, exit, report, tail).await
                    }
                    Ok(Err(e)) => fail(&mut responder, e).await,
                    Err(Interrupt::Disconnected) => {
                        process.terminate().await;
                        responder.abort();
                        BridgeOutcome::Disconnected
                    }
                    Err(Interrupt::TimedOut) => {
                        process.terminate().await;
                        tracing::warn!(?pid, %label, ?limit, "process timed out, terminated");
                        fail_timed_out(&mut responder, limit).await
                    }
                    Err(Interrupt::Failed(e)) => {
                        process.terminate().await;
                        fail(&mut responder, e).await
                    }
                }
            }
        };

        match &outcome {
            BridgeOutcome::Completed => tracing::info!(?pid, %label, "stream completed"),
            BridgeOutcome::Failed(e) => tracing::info!(?pid, %label, error = %e, "stream failed"),
            BridgeOutcome::Disconnected => {
                tracing::info!(?pid, %label, "client disconnected, process terminated")
            }
        }
        outcome
    }
}

/// Pick the terminal event once the output is drained and the exit status is known.
async fn settle(
    responder: &mut SseResponder,
    label: &str,
    exit: ProcessOutcome,
    mut report: DrainReport,
    tail: Vec<String>,
) -> BridgeOutcome {
    if !report.read_failures.is_empty() {
        let first = report.read_failures.swap_remove(0);
        return fail(responder, first).await;
    }
    if !exit.success() {
        return fail(responder, StreamError::ExecutionFailure { outcome: exit, tail }).await;
    }
    match responder
        .finish(StreamEvent::complete(format!("{} completed successfully", label)))
        .await
    {
        Ok(()) => BridgeOutcome::Completed,
        Err(_) => BridgeOutcome::Disconnected,
    }
}

async fn fail(responder: &mut SseResponder, error: StreamError) -> BridgeOutcome {
    match responder.finish(StreamEvent::error(error.to_string())).await {
        Ok(()) => BridgeOutcome::Failed(error),
        Err(_) => BridgeOutcome::Disconnected,
    }
}

/// The process is already gone; a client that is not reading only gets a
/// short grace to take the `error` event before the stream is dropped.
async fn fail_timed_out(responder: &mut SseResponder, limit: Duration) -> BridgeOutcome {
    let error = StreamError::Timeout(limit);
    let event = StreamEvent::error(error.to_string());
    match tokio::time::timeout(TERMINAL_WRITE_GRACE, responder.finish(event)).await {
        Ok(Ok(())) => BridgeOutcome::Failed(error),
        Ok(Err(_)) => BridgeOutcome::Disconnected,
        Err(_) => {
            tracing::warn!("client stopped reading, dropping stream without a terminal event");
            responder.abort();
            BridgeOutcome::Failed(error)
        }
    }
}

async fn join_drain(drain: JoinHandle<DrainReport>) -> DrainReport {
    match drain.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "drain barrier task failed");
            DrainReport::default()
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
