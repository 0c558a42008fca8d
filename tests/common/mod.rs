// tests/common/mod.rs
//
// In-process fakes for fetch strategies and the hazard API.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relief_alerts::aggregator::{AlertCache, Aggregator};
use relief_alerts::alerts::AlertRecord;
use relief_alerts::hazard::HazardSource;
use relief_alerts::ingest::types::{
    FetchStrategy, RawItem, SourceDescriptor, SourceKind, StrategySet,
};

/// Returns a fixed list for every source and counts calls.
pub struct CountingFetcher {
    pub kind: SourceKind,
    pub titles: Vec<String>,
    pub calls: Arc<AtomicUsize>,
}

impl CountingFetcher {
    pub fn new(kind: SourceKind, titles: &[&str]) -> Self {
        Self {
            kind,
            titles: titles.iter().map(|t| t.to_string()).collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl FetchStrategy for CountingFetcher {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, src: &SourceDescriptor) -> Vec<RawItem> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        self.titles
            .iter()
            .enumerate()
            .map(|(i, t)| RawItem {
                source: src.name.clone(),
                title: Some(t.clone()),
                link: Some(format!("{}/{i}", src.url)),
                // earlier entries are newer
                published_at: now - ChronoDuration::minutes(i as i64),
                summary: None,
                kind: self.kind,
            })
            .collect()
    }
}

/// Panics inside the fetch task.
pub struct PanickingFetcher(pub SourceKind);

#[async_trait]
impl FetchStrategy for PanickingFetcher {
    fn kind(&self) -> SourceKind {
        self.0
    }

    async fn fetch(&self, _src: &SourceDescriptor) -> Vec<RawItem> {
        panic!("upstream parser blew up");
    }
}

pub struct FailingHazards;

#[async_trait]
impl HazardSource for FailingHazards {
    async fn fetch_hazards(&self) -> Result<Vec<AlertRecord>> {
        Err(anyhow!("hazard api timed out"))
    }
}

pub struct FixedHazards(pub Vec<AlertRecord>);

#[async_trait]
impl HazardSource for FixedHazards {
    async fn fetch_hazards(&self) -> Result<Vec<AlertRecord>> {
        Ok(self.0.clone())
    }
}

pub fn feed_source(name: &str) -> SourceDescriptor {
    SourceDescriptor::new(
        SourceKind::StructuredFeed,
        name,
        format!("https://{}.example", name.to_lowercase().replace(' ', "-")),
    )
}

pub fn aggregator_with(
    sources: Vec<SourceDescriptor>,
    strategies: Vec<Arc<dyn FetchStrategy>>,
) -> Arc<Aggregator> {
    let set = strategies
        .into_iter()
        .fold(StrategySet::new(), |set, s| set.with(s));
    Arc::new(Aggregator::new(
        sources,
        set,
        Arc::new(AlertCache::new()),
        Duration::from_secs(60),
    ))
}

/// Sleeps before answering with one item; counts rounds started and finished.
pub struct SlowFetcher {
    pub delay: Duration,
    pub started: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
}

impl SlowFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl FetchStrategy for SlowFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::StructuredFeed
    }

    async fn fetch(&self, src: &SourceDescriptor) -> Vec<RawItem> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        vec![RawItem {
            source: src.name.clone(),
            title: Some("花蓮豪雨特報".to_string()),
            link: Some(format!("{}/slow", src.url)),
            published_at: Utc::now(),
            summary: None,
            kind: SourceKind::StructuredFeed,
        }]
    }
}
