// tests/api_alerts.rs
//
// HTTP-level tests for the pull endpoint, exercised via tower::ServiceExt::oneshot.
mod common;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use std::sync::Arc;
use tower::ServiceExt as _; // for `oneshot`

use common::{aggregator_with, feed_source, CountingFetcher, FailingHazards, FixedHazards};
use relief_alerts::alerts::AlertRecord;
use relief_alerts::config::AlertsConfig;
use relief_alerts::hazard::{parse_hazards, HazardSource};
use relief_alerts::ingest::types::{FetchStrategy, SourceDescriptor, SourceKind};
use relief_alerts::{router, AppState};

const BODY_LIMIT: usize = 1024 * 1024;
const HAZARDS_JSON: &str = include_str!("fixtures/cwa_hazards.json");

struct PanickingHazards;

#[async_trait]
impl HazardSource for PanickingHazards {
    async fn fetch_hazards(&self) -> Result<Vec<AlertRecord>> {
        panic!("hazard decoder bug");
    }
}

fn app_with(
    sources: Vec<SourceDescriptor>,
    strategies: Vec<Arc<dyn FetchStrategy>>,
    hazards: Arc<dyn HazardSource>,
) -> Router {
    let agg = aggregator_with(sources, strategies);
    router(AppState::new(agg, hazards, &AlertsConfig::default()))
}

async fn get_json(app: &Router, uri: &str) -> Vec<Json> {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK, "{uri} must always be 200");
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json array")
}

#[tokio::test]
async fn health_returns_ok() {
    let app = app_with(vec![], vec![], Arc::new(FailingHazards));
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn empty_sources_and_failing_hazards_yield_one_status_record() {
    let app = app_with(vec![], vec![], Arc::new(FailingHazards));
    let alerts = get_json(&app, "/api/alerts").await;

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["category"], "系統狀態");
    assert_eq!(alerts[0]["level"], "info");
    assert_eq!(alerts[0]["title"], "災害監控系統運作正常");
    assert!(alerts[0].get("link").is_none());
}

#[tokio::test]
async fn irrelevant_titles_are_filtered_out() {
    let fetcher = CountingFetcher::new(
        SourceKind::ListingScrape,
        &["台北美食展", "花蓮豪雨警報", "颱風動態更新", "紅色豪雨警戒"],
    );
    let app = app_with(
        vec![SourceDescriptor::new(SourceKind::ListingScrape, "WRA News", "https://wra.example")],
        vec![Arc::new(fetcher)],
        Arc::new(FailingHazards),
    );
    let alerts = get_json(&app, "/api/alerts").await;

    let titles: Vec<&str> = alerts.iter().filter_map(|a| a["title"].as_str()).collect();
    assert_eq!(titles.len(), 3);
    assert!(!titles.contains(&"台北美食展"));

    let level_of = |t: &str| {
        alerts
            .iter()
            .find(|a| a["title"] == t)
            .map(|a| a["level"].as_str().unwrap_or_default().to_string())
    };
    assert_eq!(level_of("花蓮豪雨警報").as_deref(), Some("info"));
    assert_eq!(level_of("颱風動態更新").as_deref(), Some("warning"));
    assert_eq!(level_of("紅色豪雨警戒").as_deref(), Some("critical"));
    assert!(alerts.iter().all(|a| a["category"] == "災害資訊"));
    assert!(alerts.iter().all(|a| a["content"] == "請點擊查看詳細資訊"));
}

#[tokio::test]
async fn large_input_is_capped_at_eight() {
    let titles: Vec<String> = (0..40).map(|i| format!("花蓮地震報告 #{i}")).collect();
    let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
    let fetcher = CountingFetcher::new(SourceKind::StructuredFeed, &refs);
    let hazards = parse_hazards(HAZARDS_JSON, "花蓮縣", 2, chrono::Utc::now()).unwrap();
    assert_eq!(hazards.len(), 2);

    let app = app_with(
        vec![feed_source("CWA Earthquake")],
        vec![Arc::new(fetcher)],
        Arc::new(FixedHazards(hazards)),
    );
    let alerts = get_json(&app, "/api/alerts").await;

    // 6 aggregated + 2 hazard records
    assert_eq!(alerts.len(), 8);
    let aggregated: Vec<&Json> = alerts
        .iter()
        .filter(|a| a["id"].as_str().unwrap_or_default().starts_with("agg-"))
        .collect();
    assert_eq!(aggregated.len(), 6);
    assert!(aggregated.iter().all(|a| a["category"] == "地震資訊"));
    assert!(alerts.iter().any(|a| a["id"] == "cwb-H-20251018-01" && a["level"] == "critical"));

    let stamps: Vec<chrono::DateTime<chrono::Utc>> = alerts
        .iter()
        .map(|a| a["timestamp"].as_str().unwrap().parse().unwrap())
        .collect();
    assert!(stamps.windows(2).all(|w| w[0] >= w[1]), "newest first");
}

#[tokio::test]
async fn two_pulls_in_window_agree() {
    let fetcher = CountingFetcher::new(SourceKind::StructuredFeed, &["花蓮淹水", "光復鄉停班停課"]);
    let calls = fetcher.calls();
    let app = app_with(
        vec![feed_source("CWA")],
        vec![Arc::new(fetcher)],
        Arc::new(FailingHazards),
    );

    let key = |v: &Vec<Json>| {
        v.iter()
            .map(|a| {
                (
                    a["title"].clone(),
                    a["link"].clone(),
                    a["level"].clone(),
                    a["category"].clone(),
                )
            })
            .collect::<Vec<_>>()
    };
    let first = get_json(&app, "/api/alerts").await;
    let second = get_json(&app, "/api/alerts").await;
    assert_eq!(key(&first), key(&second));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pipeline_panic_becomes_unavailable_placeholder() {
    let app = app_with(vec![], vec![], Arc::new(PanickingHazards));
    let alerts = get_json(&app, "/api/alerts").await;

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["title"], "災害監控系統運作中");
    assert_eq!(alerts[0]["category"], "系統狀態");
}

#[tokio::test]
async fn missing_strategy_becomes_unavailable_placeholder() {
    let app = app_with(
        vec![SourceDescriptor::new(SourceKind::ListingScrape, "Orphan", "https://o.example")],
        vec![],
        Arc::new(FailingHazards),
    );
    let alerts = get_json(&app, "/api/alerts").await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["title"], "災害監控系統運作中");
}

#[tokio::test]
async fn cors_allows_configured_origin_only() {
    let app = app_with(vec![], vec![], Arc::new(FailingHazards));

    let req = Request::builder()
        .uri("/health")
        .header("origin", "http://localhost:5500")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:5500")
    );

    let req = Request::builder()
        .uri("/health")
        .header("origin", "https://evil.example")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let app = app_with(vec![], vec![], Arc::new(FailingHazards));
    let _ = get_json(&app, "/api/alerts").await;

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
