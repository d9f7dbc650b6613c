//! Tools catalog service: a small SQLite-backed CRUD API with usage stats.
//!
//! - `models`: rows, request bodies and the `{success, message, data, error}` envelope
//! - `db`: `CatalogDb` queries and the async `DbHandle`
//! - `api`: axum router, admin API-key layer and handlers

pub mod api;
pub mod db;
pub mod models;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use api::{CatalogState, SharedCatalog, catalog_router};
pub use db::{CatalogDb, DbHandle};

/// Settings for `tion catalog`.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub api_key: Option<String>,
    pub seed: bool,
    pub service_name: String,
    pub version: String,
}

/// Open the database (seeding it when asked) and build the shared state.
pub fn open_state(config: &CatalogConfig) -> Result<SharedCatalog> {
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = CatalogDb::new(&config.db_path).context("Failed to initialize catalog database")?;
    if config.seed {
        let inserted = db.seed_defaults()?;
        tracing::info!(inserted, "seeded tools catalog");
    }
    if config.api_key.is_none() {
        tracing::warn!("API_KEY is not set; admin routes accept any non-empty X-API-Key");
    }
    Ok(Arc::new(CatalogState {
        db: DbHandle::new(db),
        api_key: config.api_key.clone(),
        service_name: config.service_name.clone(),
        version: config.version.clone(),
    }))
}

pub async fn start_server(config: CatalogConfig) -> Result<()> {
    let state = open_state(&config)?;
    tracing::info!(db = %config.db_path.display(), "catalog database ready");

    let app = catalog_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
    let addr = format!("{}:{}", config.host, config.port);
    crate::server::serve(app, &addr, "Tion tools catalog").await
}
