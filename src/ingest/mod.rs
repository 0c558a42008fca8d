// src/ingest/mod.rs
pub mod providers;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("alerts_cache_hits_total", "Aggregations served from cache.");
        describe_counter!(
            "alerts_cache_misses_total",
            "Aggregations that found the cache stale or empty."
        );
        describe_counter!("alerts_refresh_total", "Completed fetch rounds.");
        describe_histogram!("alerts_refresh_ms", "Fetch round duration in milliseconds.");
        describe_counter!(
            "alerts_source_items_total",
            "Raw items produced per source."
        );
        describe_counter!(
            "alerts_source_errors_total",
            "Source fetch/parse failures (recovered as empty)."
        );
        describe_histogram!("alerts_feed_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("alerts_cached_items", "Items in the current cache snapshot.");
        describe_counter!(
            "alerts_hazard_errors_total",
            "Hazard API failures (recovered as zero records)."
        );
        describe_gauge!("alerts_stream_subscribers", "Open push subscriptions.");
        describe_counter!(
            "alerts_pull_fallback_total",
            "Pull requests answered with the unavailable placeholder."
        );
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Collapse whitespace (ideographic space included)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{3000}]+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 4) Length cap: 500 chars
    if out.chars().count() > 500 {
        out = out.chars().take(500).collect();
    }

    out
}

/// `Some(normalized)` unless the result is empty.
pub fn non_empty_text(s: Option<&str>) -> Option<String> {
    s.map(normalize_text).filter(|t| !t.is_empty())
}
