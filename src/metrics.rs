// src/metrics.rs
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

#[derive(Clone)]
pub struct Metrics {
    pub handle: Option<PrometheusHandle>,
}

impl Metrics {
    /// Install the Prometheus recorder once per process. A second router built in the
    /// same process (tests) reuses the first handle; if another recorder is already
    /// global, `/metrics` renders empty instead of panicking.
    pub fn init() -> Self {
        static HANDLE: OnceCell<Option<PrometheusHandle>> = OnceCell::new();
        let handle = HANDLE
            .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(h) => Some(h),
                Err(e) => {
                    tracing::warn!(error = ?e, "prometheus recorder not installed");
                    None
                }
            })
            .clone();
        crate::ingest::ensure_metrics_described();
        Self { handle }
    }

    /// Render the current exposition text.
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let metrics = self.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let m = metrics.clone();
                async move { m.render() }
            }),
        )
    }
}
