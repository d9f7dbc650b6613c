//! HTTP surface of the agent server.
//!
//! `api` holds the shared state, error type and route handlers for agent
//! streams, projects, git and deploys. `monitor` reports uptime and project
//! summaries. `server` wires the router and runs it.

pub mod api;
pub mod monitor;
pub mod server;

pub use api::{ApiError, AppState, SharedState, api_router};
pub use server::{build_router, serve, start_server};
