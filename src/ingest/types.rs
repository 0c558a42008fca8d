// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    #[serde(alias = "rss")]
    StructuredFeed,
    #[serde(alias = "html")]
    ListingScrape,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::StructuredFeed => "structured-feed",
            SourceKind::ListingScrape => "listing-scrape",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub name: String,
    pub url: String,
}

impl SourceDescriptor {
    pub fn new(kind: SourceKind, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub source: String,        // provenance label, e.g. "CWA Earthquake"
    pub title: Option<String>, // trimmed
    pub link: Option<String>,  // absolute URL
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub kind: SourceKind,
}

impl RawItem {
    /// Usable items carry both a non-empty title and a non-empty link.
    pub fn is_usable(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.title) && filled(&self.link)
    }
}

/// A way of turning one source into raw items. Implementations are total:
/// any failure is logged and reported as an empty vector.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn fetch(&self, source: &SourceDescriptor) -> Vec<RawItem>;
}

/// Registered strategies, one per source kind.
#[derive(Clone, Default)]
pub struct StrategySet {
    by_kind: HashMap<SourceKind, Arc<dyn FetchStrategy>>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `strategy` under its own kind, replacing any previous one.
    pub fn with(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.by_kind.insert(strategy.kind(), strategy);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn FetchStrategy>> {
        self.by_kind.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

impl fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.by_kind.keys().map(SourceKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("StrategySet").field("kinds", &kinds).finish()
    }
}
