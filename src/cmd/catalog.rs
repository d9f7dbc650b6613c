//! Tools catalog command: `tion catalog`.

use anyhow::Result;
use tion::catalog::{self, CatalogConfig};
use tion::config::Config;

pub async fn cmd_catalog(config: &Config, init: bool) -> Result<()> {
    let catalog_config = CatalogConfig {
        host: config.host.clone(),
        port: config.port,
        db_path: config.database_path.clone(),
        api_key: config.api_key.clone(),
        seed: init,
        service_name: config.service_name.clone(),
        version: config.version.clone(),
    };

    if init {
        catalog::open_state(&catalog_config)?;
        println!(
            "Catalog database initialized at {}",
            catalog_config.db_path.display()
        );
        return Ok(());
    }

    catalog::start_server(catalog_config).await
}
