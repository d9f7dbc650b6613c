//! Agent server command: `tion serve`.

use anyhow::Result;
use tion::config::Config;

pub async fn cmd_serve(config: Config) -> Result<()> {
    if !config.frontends_dir().is_dir() {
        tracing::warn!(
            dir = %config.frontends_dir().display(),
            "frontends directory does not exist yet; project listing will be empty"
        );
    }
    tion::server::start_server(config).await
}
