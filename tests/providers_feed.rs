// tests/providers_feed.rs
use chrono::{TimeZone, Utc};
use relief_alerts::ingest::providers::feed::parse_feed;
use relief_alerts::ingest::types::SourceKind;

const CWA_RSS: &str = include_str!("fixtures/cwa_eqk_rss.xml");
const ATOM: &str = include_str!("fixtures/atom_feed.xml");

#[test]
fn rss_fixture_parses_titles_links_and_dates() {
    let fetched_at = Utc.with_ymd_and_hms(2025, 10, 18, 5, 0, 0).unwrap();
    let items = parse_feed(CWA_RSS, "CWA Earthquake", fetched_at, 15).expect("rss parse ok");

    assert_eq!(items.len(), 3, "every entry is returned; filtering happens later");
    assert!(items.iter().all(|i| i.source == "CWA Earthquake"));
    assert!(items.iter().all(|i| i.kind == SourceKind::StructuredFeed));

    let first = &items[0];
    assert_eq!(
        first.title.as_deref(),
        Some("地震報告：花蓮縣政府南南東方 25.3 公里，規模 5.1")
    );
    assert_eq!(
        first.link.as_deref(),
        Some("https://www.cwa.gov.tw/V8/C/E/EQ/EQ114001-1018-1002-01.html")
    );
    assert_eq!(
        first.published_at,
        Utc.with_ymd_and_hms(2025, 10, 18, 2, 2, 0).unwrap()
    );
    assert_eq!(first.summary.as_deref(), Some("發震時間：10:00 最大震度 4級"));

    let blank = &items[2];
    assert!(blank.title.is_none(), "whitespace-only title becomes None");
    assert_eq!(blank.published_at, fetched_at, "bad date falls back to fetch time");
}

#[test]
fn atom_fixture_is_accepted_as_fallback() {
    let fetched_at = Utc::now();
    let items = parse_feed(ATOM, "East Notices", fetched_at, 15).expect("atom parse ok");

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title.as_deref(), Some("光復鄉馬太鞍溪堰塞湖警戒"));
    assert_eq!(
        items[0].link.as_deref(),
        Some("https://relief.example.org/notice/1"),
        "alternate link wins over self"
    );
    assert_eq!(items[0].summary.as_deref(), Some("請沿岸居民提高警覺"));
    assert_eq!(
        items[1].published_at,
        Utc.with_ymd_and_hms(2025, 10, 17, 4, 0, 0).unwrap(),
        "published preferred over updated"
    );
}

#[test]
fn cap_limits_entries() {
    let items = parse_feed(CWA_RSS, "CWA", Utc::now(), 2).unwrap();
    assert_eq!(items.len(), 2);
}
