// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregator;
pub mod alerts;
pub mod api;
pub mod config;
pub mod hazard;
pub mod ingest;
pub mod metrics;
pub mod stream;

pub use crate::api::{router, AppState};

use axum::Router;

/// Load configuration and build the production router.
pub fn app() -> anyhow::Result<Router> {
    let cfg = config::load_default()?;
    tracing::info!(
        sources = cfg.sources.len(),
        ttl_secs = cfg.cache.ttl_secs,
        hazard = cfg.hazard.enabled,
        origins = cfg.server.allowed_origins.len(),
        "alerts service configured"
    );
    Ok(router(AppState::from_config(&cfg)))
}
