// src/api.rs
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::{sse::Sse, IntoResponse},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use metrics::counter;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::aggregator::{AlertCache, Aggregator};
use crate::alerts::{unavailable_placeholder, AlertRecord, AlertService};
use crate::config::AlertsConfig;
use crate::hazard::{self, HazardSource};
use crate::ingest::providers::{default_strategies, http_client};
use crate::metrics::Metrics;
use crate::stream::StreamHub;

#[derive(Clone)]
pub struct AppState {
    pub alerts: AlertService,
    pub stream: StreamHub,
    pub metrics: Metrics,
    allowed_origins: Arc<[String]>,
}

impl AppState {
    /// Wire an already-built aggregator and hazard source (tests inject fakes here).
    pub fn new(
        aggregator: Arc<Aggregator>,
        hazards: Arc<dyn HazardSource>,
        cfg: &AlertsConfig,
    ) -> Self {
        Self {
            alerts: AlertService::new(Arc::clone(&aggregator), hazards, cfg.alerts.clone()),
            stream: StreamHub::new(aggregator, cfg.stream.interval()),
            metrics: Metrics::init(),
            allowed_origins: cfg.server.allowed_origins.clone().into(),
        }
    }

    /// Production wiring: HTTP fetchers for every configured source plus the CWA hazard API.
    pub fn from_config(cfg: &AlertsConfig) -> Self {
        let aggregator = Aggregator::new(
            cfg.sources.clone(),
            default_strategies(&cfg.fetch),
            Arc::new(AlertCache::new()),
            cfg.cache.ttl(),
        );
        let hazards: Arc<dyn HazardSource> =
            hazard::from_config(http_client(&cfg.fetch.user_agent), &cfg.hazard).into();
        Self::new(Arc::new(aggregator), hazards, cfg)
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            // a wildcard is not allowed inside an origin list
            Ok(v) if o != "*" => Some(v),
            _ => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    let metrics = state.metrics.router();

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/alerts", get(get_alerts))
        .route("/api/alerts/stream", get(alerts_stream))
        .merge(metrics)
        .layer(cors)
        .with_state(state)
}

/// Always 200 with 1..=8 records. The pipeline runs in its own task so a panic
/// inside it still yields a response.
async fn get_alerts(State(state): State<AppState>) -> Json<Vec<AlertRecord>> {
    let service = state.alerts.clone();
    match tokio::spawn(async move { service.build_alerts().await }).await {
        Ok(alerts) => Json(alerts),
        Err(e) => {
            tracing::error!(error = %e, "alert pipeline task failed");
            counter!("alerts_pull_fallback_total").increment(1);
            Json(vec![unavailable_placeholder(Utc::now())])
        }
    }
}

async fn alerts_stream(State(state): State<AppState>) -> impl IntoResponse {
    let subscription = state.stream.subscribe();
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(subscription),
    )
}
