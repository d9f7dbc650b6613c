//! Typed error hierarchy for the tion backends.
//!
//! Two top-level enums cover the two subsystems that surface errors to callers:
//! - `StreamError`: failures of the agent stream bridge (spawn, pipes, exit)
//! - `ServiceError`: workspace, git and deploy helper failures
//!
//! HTTP layers translate both into `ApiError` responses.

use std::time::Duration;

use thiserror::Error;

use crate::bridge::{Origin, ProcessOutcome};

/// Errors from the subprocess-to-stream bridge.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to start {program}: {reason}")]
    StartFailure { program: String, reason: String },

    #[error("Failed to capture {0} of child process")]
    PipeFailure(Origin),

    #[error("Failed to read {origin}: {message}")]
    ReadFailure { origin: Origin, message: String },

    #[error("{}", describe_exit(.outcome, .tail))]
    ExecutionFailure {
        outcome: ProcessOutcome,
        tail: Vec<String>,
    },

    #[error("Process exceeded the maximum run time of {}s", whole_secs(.0))]
    Timeout(Duration),

    #[error("Client disconnected")]
    ClientDisconnect,

    #[error("Event stream is already closed")]
    StreamClosed,

    #[error("Failed to encode {kind} event: {message}")]
    Encode { kind: &'static str, message: String },

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

impl StreamError {
    /// True for failures detected before any output could be streamed.
    pub fn is_start_failure(&self) -> bool {
        matches!(self, Self::StartFailure { .. } | Self::PipeFailure(_))
    }
}

fn whole_secs(limit: &Duration) -> u64 {
    limit.as_secs()
}

fn describe_exit(outcome: &ProcessOutcome, tail: &[String]) -> String {
    if tail.is_empty() {
        format!("Process {}", outcome)
    } else {
        format!("Process {}: {}", outcome, tail.join("\n"))
    }
}

/// Errors from the workspace, git and deploy helpers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Project {name} does not exist at {path}")]
    ProjectNotFound { name: String, path: String },

    #[error("Project {name} is not a valid Node.js project (missing package.json)")]
    InvalidProject { name: String },

    #[error("Invalid project name '{0}'")]
    InvalidName(String),

    #[error("`{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote API returned {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
