pub mod bridge;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod logging;
pub mod server;
pub mod services;
