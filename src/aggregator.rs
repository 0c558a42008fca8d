// src/aggregator.rs
//
// Fan-out over configured sources plus the time-boxed cache both delivery
// paths read from.
use anyhow::{anyhow, Result};
use metrics::{counter, gauge, histogram};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::ingest::ensure_metrics_described;
use crate::ingest::types::{FetchStrategy, RawItem, SourceDescriptor, StrategySet};

/// Immutable view of the cache at one point in time.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub items: Arc<Vec<RawItem>>,
    /// `None` until the first refresh completes.
    pub fetched_at: Option<Instant>,
}

impl CacheSnapshot {
    fn empty() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            fetched_at: None,
        }
    }

    /// Fresh = non-empty and younger than `ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        match self.fetched_at {
            Some(at) => !self.items.is_empty() && now.saturating_duration_since(at) < ttl,
            None => false,
        }
    }
}

/// Holds the latest aggregation. Replacement swaps the whole snapshot at once.
#[derive(Debug)]
pub struct AlertCache {
    inner: RwLock<CacheSnapshot>,
}

impl Default for AlertCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CacheSnapshot::empty()),
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, items: Vec<RawItem>, fetched_at: Instant) -> Arc<Vec<RawItem>> {
        let items = Arc::new(items);
        let next = CacheSnapshot {
            items: Arc::clone(&items),
            fetched_at: Some(fetched_at),
        };
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
        gauge!("alerts_cached_items").set(items.len() as f64);
        items
    }
}

/// Sources, strategies and cache shared with detached refresh rounds.
struct Inner {
    sources: Vec<SourceDescriptor>,
    strategies: StrategySet,
    cache: Arc<AlertCache>,
}

pub struct Aggregator {
    inner: Arc<Inner>,
    ttl: Duration,
    refresh_lock: Arc<Mutex<()>>,
}

impl Aggregator {
    pub fn new(
        sources: Vec<SourceDescriptor>,
        strategies: StrategySet,
        cache: Arc<AlertCache>,
        ttl: Duration,
    ) -> Self {
        ensure_metrics_described();
        Self {
            inner: Arc::new(Inner {
                sources,
                strategies,
                cache,
            }),
            ttl,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn cache(&self) -> &Arc<AlertCache> {
        &self.inner.cache
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.inner.sources
    }

    fn fresh_items(&self) -> Option<Arc<Vec<RawItem>>> {
        let snap = self.inner.cache.snapshot();
        snap.is_fresh(self.ttl, Instant::now()).then_some(snap.items)
    }

    /// Aggregated items from every source, newest first. Served from cache while fresh;
    /// concurrent callers that find it stale share a single fetch round.
    pub async fn get_aggregated_items(&self) -> Result<Arc<Vec<RawItem>>> {
        if let Some(items) = self.fresh_items() {
            counter!("alerts_cache_hits_total").increment(1);
            tracing::debug!(count = items.len(), "alerts cache hit");
            return Ok(items);
        }

        let guard = Arc::clone(&self.refresh_lock).lock_owned().await;
        // another caller may have refreshed while we waited
        if let Some(items) = self.fresh_items() {
            counter!("alerts_cache_hits_total").increment(1);
            return Ok(items);
        }
        counter!("alerts_cache_misses_total").increment(1);
        self.spawn_round(guard).await
    }

    /// Forces a fetch round regardless of freshness.
    pub async fn refresh_now(&self) -> Result<Arc<Vec<RawItem>>> {
        let guard = Arc::clone(&self.refresh_lock).lock_owned().await;
        self.spawn_round(guard).await
    }

    /// Push-path variant: never fails, logs and yields an empty list instead.
    pub async fn items_or_empty(&self) -> Arc<Vec<RawItem>> {
        match self.get_aggregated_items().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = ?e, "aggregation failed; pushing empty list");
                Arc::new(Vec::new())
            }
        }
    }

    /// Runs the round on its own task, which keeps the refresh lock until the cache is
    /// replaced. A caller that goes away mid-round only stops waiting.
    async fn spawn_round(&self, guard: OwnedMutexGuard<()>) -> Result<Arc<Vec<RawItem>>> {
        let inner = Arc::clone(&self.inner);
        let round = tokio::spawn(async move {
            let _guard = guard;
            inner.refresh().await
        });
        round
            .await
            .map_err(|e| anyhow!("refresh task failed: {e}"))?
    }
}

impl Inner {
    async fn refresh(&self) -> Result<Arc<Vec<RawItem>>> {
        let t0 = Instant::now();
        let items = self.fetch_all().await?;
        let ms = t0.elapsed().as_secs_f64() * 1_000.0;

        counter!("alerts_refresh_total").increment(1);
        histogram!("alerts_refresh_ms").record(ms);
        tracing::info!(
            sources = self.sources.len(),
            items = items.len(),
            elapsed_ms = ms as u64,
            "alerts cache refreshed"
        );

        Ok(self.cache.replace(items, Instant::now()))
    }

    fn plan(&self) -> Result<Vec<(SourceDescriptor, Arc<dyn FetchStrategy>)>> {
        self.sources
            .iter()
            .map(|src| {
                self.strategies
                    .get(src.kind)
                    .map(|s| (src.clone(), s))
                    .ok_or_else(|| {
                        anyhow!("no fetch strategy for kind {} (source {})", src.kind, src.name)
                    })
            })
            .collect()
    }

    /// One concurrent round over all sources. Items keep configuration order before the
    /// stable recency sort; unusable items (no title or link) are dropped.
    async fn fetch_all(&self) -> Result<Vec<RawItem>> {
        let plan = self.plan()?;

        let mut set = JoinSet::new();
        let mut slot_of = HashMap::with_capacity(plan.len());
        for (idx, (src, strategy)) in plan.into_iter().enumerate() {
            let handle = set.spawn(async move { (idx, strategy.fetch(&src).await) });
            slot_of.insert(handle.id(), idx);
        }

        let mut slots: Vec<Vec<RawItem>> = vec![Vec::new(); self.sources.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, items)) => slots[idx] = items,
                Err(e) => {
                    let source = slot_of
                        .get(&e.id())
                        .map(|&i| self.sources[i].name.as_str())
                        .unwrap_or("?");
                    tracing::warn!(error = %e, source, "source task failed; contributing nothing");
                    counter!("alerts_source_errors_total", "source" => source.to_string())
                        .increment(1);
                }
            }
        }

        let mut items = Vec::new();
        for (src, fetched) in self.sources.iter().zip(slots) {
            counter!("alerts_source_items_total", "source" => src.name.clone())
                .increment(fetched.len() as u64);
            items.extend(fetched.into_iter().filter(RawItem::is_usable));
        }
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(items)
    }
}
