//! CLI command implementations.
//!
//! | Module         | Commands handled |
//! |----------------|------------------|
//! | `serve`        | `Serve`          |
//! | `catalog`      | `Catalog`        |
//! | `check_config` | `CheckConfig`    |

pub mod catalog;
pub mod check_config;
pub mod serve;

pub use catalog::cmd_catalog;
pub use check_config::cmd_check_config;
pub use serve::cmd_serve;
