// src/ingest/providers/feed.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::config::FetchConfig;
use crate::ingest::non_empty_text;
use crate::ingest::types::{FetchStrategy, RawItem, SourceDescriptor, SourceKind};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    // required so that arbitrary XML/HTML is not taken for an empty feed
    #[allow(dead_code)]
    title: AtomText,
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}
#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    updated: Option<String>,
    published: Option<String>,
    summary: Option<AtomText>,
}
#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    /// `rel="alternate"` (or no rel) wins over other link relations.
    fn best_link(&self) -> Option<String> {
        self.link
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.link.first())
            .and_then(|l| l.href.as_deref())
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
    }
}

/// Parse a feed date. RFC 2822 (RSS) and RFC 3339 (Atom) are accepted.
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let strict = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()
        .and_then(|dt| Utc.timestamp_opt(dt.unix_timestamp(), dt.nanosecond()).single());
    // chrono is more forgiving about legacy zone names like "GMT"/"EST"
    strict.or_else(|| {
        DateTime::parse_from_rfc2822(ts)
            .or_else(|_| DateTime::parse_from_rfc3339(ts))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn trimmed(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse an RSS 2.0 document (Atom as a fallback) into at most `cap` raw items.
/// Entries without a usable date are stamped with `fetched_at`.
pub fn parse_feed(
    xml: &str,
    source: &str,
    fetched_at: DateTime<Utc>,
    cap: usize,
) -> Result<Vec<RawItem>> {
    let xml_clean = scrub_html_entities_for_xml(xml);

    let date_or_now = |d: Option<&str>| d.and_then(parse_feed_date).unwrap_or(fetched_at);

    let rss_err = match from_str::<Rss>(&xml_clean) {
        Ok(rss) => {
            return Ok(rss
                .channel
                .item
                .into_iter()
                .take(cap)
                .map(|it| RawItem {
                    source: source.to_string(),
                    title: non_empty_text(it.title.as_deref()),
                    link: trimmed(it.link),
                    published_at: date_or_now(it.pub_date.as_deref()),
                    summary: non_empty_text(it.description.as_deref()),
                    kind: SourceKind::StructuredFeed,
                })
                .collect());
        }
        Err(e) => e,
    };

    let atom: AtomFeed = from_str(&xml_clean)
        .map_err(|atom_err| anyhow!("not RSS ({rss_err}) nor Atom ({atom_err})"))?;
    Ok(atom
        .entry
        .into_iter()
        .take(cap)
        .map(|e| {
            let link = e.best_link();
            let date = e.published.as_deref().or(e.updated.as_deref());
            RawItem {
                source: source.to_string(),
                title: non_empty_text(e.title.and_then(|t| t.value).as_deref()),
                link,
                published_at: date_or_now(date),
                summary: non_empty_text(e.summary.and_then(|t| t.value).as_deref()),
                kind: SourceKind::StructuredFeed,
            }
        })
        .collect())
}

/// Fetches RSS/Atom sources over HTTP.
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    cap: usize,
    user_agent: String,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, fetch: &FetchConfig) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(fetch.feed_timeout_secs),
            cap: fetch.feed_item_cap,
            user_agent: fetch.user_agent.clone(),
        }
    }

    async fn try_fetch(&self, source: &SourceDescriptor) -> Result<Vec<RawItem>> {
        let body =
            super::get_text(&self.client, &source.url, self.timeout, &self.user_agent).await?;
        let t0 = std::time::Instant::now();
        let items = parse_feed(&body, &source.name, Utc::now(), self.cap)
            .with_context(|| format!("parsing feed {}", source.name))?;
        histogram!("alerts_feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(items)
    }
}

#[async_trait]
impl FetchStrategy for FeedFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::StructuredFeed
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Vec<RawItem> {
        match self.try_fetch(source).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    source = %source.name,
                    url = %source.url,
                    "feed fetch failed"
                );
                counter!("alerts_source_errors_total", "source" => source.name.clone())
                    .increment(1);
                Vec::new()
            }
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
