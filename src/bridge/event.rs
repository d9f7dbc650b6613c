use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mux::{Origin, OutputLine};

/// A stream event as it appears on the wire, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        message: String,
        time: DateTime<Utc>,
    },
    Chunk {
        content: String,
        origin: Origin,
        seq: u64,
        time: DateTime<Utc>,
    },
    Error {
        message: String,
        time: DateTime<Utc>,
    },
    Complete {
        message: String,
        time: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn start(message: impl Into<String>) -> Self {
        StreamEvent::Start {
            message: message.into(),
            time: Utc::now(),
        }
    }

    pub fn chunk(line: &OutputLine) -> Self {
        StreamEvent::Chunk {
            content: line.text.clone(),
            origin: line.origin,
            seq: line.seq,
            time: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            time: Utc::now(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        StreamEvent::Complete {
            message: message.into(),
            time: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Complete { .. } => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error { .. } | StreamEvent::Complete { .. })
    }
}

/// Converts events to and from the `data: <json>\n\n` frame format.
pub struct EventEncoder;

impl EventEncoder {
    /// JSON payload of one event. Never contains a raw newline.
    pub fn to_json(event: &StreamEvent) -> Result<String, serde_json::Error> {
        serde_json::to_string(event)
    }

    /// An `error` payload assembled from a `serde_json::Value`, used when a
    /// terminal event itself cannot be encoded.
    pub fn fallback_error(message: &str) -> String {
        serde_json::json!({
            "type": "error",
            "message": message,
            "time": Utc::now().to_rfc3339(),
        })
        .to_string()
    }

    pub fn encode_frame(event: &StreamEvent) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", Self::to_json(event)?))
    }

    /// Parse every `data:` frame in an SSE body. Comment lines (keep-alives)
    /// and blank frames are skipped.
    pub fn decode_frames(body: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        body.split("\n\n")
            .filter_map(|frame| {
                frame
                    .lines()
                    .find_map(|l| l.strip_prefix("data:"))
                    .map(str::trim_start)
            })
            .map(serde_json::from_str)
            .collect()
    }
}
