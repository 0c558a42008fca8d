// src/ingest/providers/mod.rs
pub mod feed;
pub mod listing;

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::ingest::types::StrategySet;

pub use feed::FeedFetcher;
pub use listing::ListingFetcher;

/// Client shared by the HTTP fetchers. Timeouts are applied per request.
pub fn http_client(user_agent: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = ?e, "http client builder failed; using defaults");
            reqwest::Client::new()
        })
}

/// GET `url` and return the body; non-2xx is an error.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    user_agent: &str,
) -> Result<String> {
    let resp = client
        .get(url)
        .header(reqwest::header::USER_AGENT, user_agent)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        bail!("GET {url} -> HTTP {status}");
    }
    resp.text().await.context("reading response body")
}

/// The HTTP-backed strategies for both source kinds, sharing one client.
pub fn default_strategies(fetch: &FetchConfig) -> StrategySet {
    let client = http_client(&fetch.user_agent);
    StrategySet::new()
        .with(Arc::new(FeedFetcher::new(client.clone(), fetch)))
        .with(Arc::new(ListingFetcher::new(client, fetch)))
}
