// src/ingest/providers/listing.rs
//
// Heuristic scrape of "latest news" listing pages: every anchor with enough
// visible text is treated as an entry.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::config::FetchConfig;
use crate::ingest::types::{FetchStrategy, RawItem, SourceDescriptor, SourceKind};

/// Limits applied while walking a listing page.
#[derive(Debug, Clone, Copy)]
pub struct ListingRules {
    /// Visible text must be strictly longer than this many chars.
    pub min_title_chars: usize,
    pub cap: usize,
}

impl From<&FetchConfig> for ListingRules {
    fn from(f: &FetchConfig) -> Self {
        Self {
            min_title_chars: f.listing_min_title_chars,
            cap: f.listing_item_cap,
        }
    }
}

/// Absolute hrefs come back unchanged; anything else resolves against `base`.
fn resolve_href(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(String::from)
}

/// Extract anchor candidates from `html`. Relative links resolve against `page_url`;
/// duplicate (title, link) pairs collapse to the first occurrence.
pub fn scrape_listing(
    html: &str,
    page_url: &str,
    source: &str,
    fetched_at: DateTime<Utc>,
    rules: ListingRules,
) -> Result<Vec<RawItem>> {
    let base = Url::parse(page_url).with_context(|| format!("invalid listing url {page_url}"))?;
    let anchor = Selector::parse("a[href]").map_err(|e| anyhow!("anchor selector: {e:?}"))?;
    let document = Html::parse_document(html);

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::new();
    for a in document.select(&anchor) {
        if out.len() >= rules.cap {
            break;
        }
        let Some(href) = a.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        // text nodes are already entity-decoded; inline markup must not add spaces
        let text: String = a.text().collect();
        let title = text.trim();
        if title.chars().count() <= rules.min_title_chars {
            continue;
        }
        let Some(link) = resolve_href(&base, href) else {
            continue;
        };
        let title = title.to_string();
        if !seen.insert((title.clone(), link.clone())) {
            continue;
        }
        out.push(RawItem {
            source: source.to_string(),
            title: Some(title),
            link: Some(link),
            published_at: fetched_at,
            summary: None,
            kind: SourceKind::ListingScrape,
        });
    }
    Ok(out)
}

/// Fetches HTML listing pages over HTTP.
pub struct ListingFetcher {
    client: reqwest::Client,
    timeout: Duration,
    rules: ListingRules,
    user_agent: String,
}

impl ListingFetcher {
    pub fn new(client: reqwest::Client, fetch: &FetchConfig) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(fetch.listing_timeout_secs),
            rules: ListingRules::from(fetch),
            user_agent: fetch.user_agent.clone(),
        }
    }

    async fn try_fetch(&self, source: &SourceDescriptor) -> Result<Vec<RawItem>> {
        let body =
            super::get_text(&self.client, &source.url, self.timeout, &self.user_agent).await?;
        // `Html` is not Send; parsing stays synchronous and never spans an await
        scrape_listing(&body, &source.url, &source.name, Utc::now(), self.rules)
    }
}

#[async_trait]
impl FetchStrategy for ListingFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::ListingScrape
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Vec<RawItem> {
        match self.try_fetch(source).await {
            Ok(items) => {
                tracing::debug!(source = %source.name, count = items.len(), "listing scraped");
                items
            }
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    source = %source.name,
                    url = %source.url,
                    "listing fetch failed"
                );
                counter!("alerts_source_errors_total", "source" => source.name.clone())
                    .increment(1);
                Vec::new()
            }
        }
    }
}
