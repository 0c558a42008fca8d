//! Alert aggregation service: binary entrypoint.
//! Boots the Axum router with the configured sources, cache, and push channel.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON when LOG_FORMAT=json. `try_init` so a subscriber
/// already installed by the hosting runtime is left alone.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("relief_alerts=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already set");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let router = relief_alerts::app()?;
    Ok(router.into())
}
