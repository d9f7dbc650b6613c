//! Subprocess-to-stream bridge.
//!
//! Runs an external CLI, drains its stdout and stderr concurrently and
//! forwards every line to an HTTP client as an ordered Server-Sent-Events
//! stream.
//!
//! ## Module Map
//!
//! ```text
//!  HTTP handler
//!      │ StreamBridge::launch(&CommandSpec, label)
//!      v
//! ┌──────────────────────────────────────────────────────────────┐
//! │ session.rs   (StreamBridge, BridgeRun::drive, BridgeOutcome) │
//! │    │                                                         │
//! │    ├─ process.rs  (CommandSpec, ProcessRunner, RunningProcess)│
//! │    │      └─ child stdout / stderr                           │
//! │    ├─ mux.rs      (StreamMultiplexer → OutputLine channel)   │
//! │    ├─ event.rs    (StreamEvent, EventEncoder)                │
//! │    └─ sse.rs      (SseResponder: Idle → Streaming → Closed)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Event Order
//!
//! Every launched run writes exactly one `start`, then one `chunk` per line,
//! then exactly one of `complete` / `error`. The terminal event is written only
//! after both readers hit end-of-stream and the exit status is known. If the
//! client disconnects the child is killed and nothing further is written.

pub mod event;
pub mod mux;
pub mod process;
pub mod session;
pub mod sse;

pub use event::{EventEncoder, StreamEvent};
pub use mux::{DEFAULT_LINE_BOUND, DrainReport, Origin, OutputLine, StreamMultiplexer};
pub use process::{CommandSpec, ProcessOutcome, ProcessRunner, RunningProcess};
pub use session::{ActiveStream, BridgeOutcome, BridgeSettings, CollectedOutput, StreamBridge};
pub use sse::{ResponderState, SseResponder, SseResponse};
