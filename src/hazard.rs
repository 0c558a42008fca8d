// src/hazard.rs
//
// Central Weather Administration hazard warnings (dataset W-C0033-001).
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::alerts::{AlertLevel, AlertRecord};
use crate::config::HazardConfig;
use crate::ingest::providers::feed::parse_feed_date;

pub const HAZARD_SOURCE: &str = "中央氣象署";
pub const HAZARD_CATEGORY: &str = "氣象警報";
const HAZARD_DEFAULT_CONTENT: &str = "請注意天氣變化，做好防護措施";

/// Best-effort supplementary warnings. Callers treat `Err` as "no records".
#[async_trait]
pub trait HazardSource: Send + Sync {
    async fn fetch_hazards(&self) -> Result<Vec<AlertRecord>>;
}

/// Used when the hazard API is switched off in config.
pub struct DisabledHazards;

#[async_trait]
impl HazardSource for DisabledHazards {
    async fn fetch_hazards(&self) -> Result<Vec<AlertRecord>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct HazardResponse {
    records: Option<Records>,
}
#[derive(Debug, Deserialize)]
struct Records {
    #[serde(default)]
    location: Vec<Location>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    location_name: String,
    hazard_conditions: Option<HazardConditions>,
}
#[derive(Debug, Deserialize)]
struct HazardConditions {
    #[serde(default, alias = "hazards")]
    hazard: Vec<Hazard>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hazard {
    hazard_id: Option<serde_json::Value>,
    phenomena: Option<String>,
    significance: Option<String>,
    issue_time: Option<String>,
}

/// CWA issue times come as RFC 3339 or as "YYYY-MM-DD HH:MM:SS" in Taiwan time.
fn parse_issue_time(s: &str) -> Option<DateTime<Utc>> {
    parse_feed_date(s).or_else(|| {
        let naive = NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
        let tw = FixedOffset::east_opt(8 * 3600)?;
        tw.from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn hazard_id(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a W-C0033-001 response into alert records: at most `cap` per location named
/// exactly `location`.
pub fn parse_hazards(
    body: &str,
    location: &str,
    cap: usize,
    now: DateTime<Utc>,
) -> Result<Vec<AlertRecord>> {
    let resp: HazardResponse = serde_json::from_str(body).context("decoding hazard json")?;
    let Some(records) = resp.records else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for loc in records.location {
        if loc.location_name != location {
            continue;
        }
        let Some(cond) = loc.hazard_conditions else {
            continue;
        };
        for hz in cond.hazard.into_iter().take(cap) {
            let significance = hz.significance.filter(|s| !s.trim().is_empty());
            let level = match significance.as_deref() {
                Some(s) if s.contains("嚴重") => AlertLevel::Critical,
                _ => AlertLevel::Warning,
            };
            out.push(AlertRecord {
                id: format!(
                    "cwb-{}",
                    hz.hazard_id.as_ref().map(hazard_id).unwrap_or_default()
                ),
                title: format!("氣象警報：{}", hz.phenomena.unwrap_or_default()),
                content: significance.unwrap_or_else(|| HAZARD_DEFAULT_CONTENT.to_string()),
                level,
                timestamp: hz
                    .issue_time
                    .as_deref()
                    .and_then(parse_issue_time)
                    .unwrap_or(now),
                source: HAZARD_SOURCE.to_string(),
                category: HAZARD_CATEGORY.to_string(),
                link: None,
            });
        }
    }
    Ok(out)
}

pub struct CwaHazardClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    location: String,
    cap: usize,
    timeout: Duration,
}

impl CwaHazardClient {
    pub fn new(client: reqwest::Client, cfg: &HazardConfig) -> Self {
        Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
            location: cfg.location.clone(),
            cap: cfg.per_location_cap,
            timeout: cfg.timeout(),
        }
    }
}

#[async_trait]
impl HazardSource for CwaHazardClient {
    async fn fetch_hazards(&self) -> Result<Vec<AlertRecord>> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("Authorization", self.api_key.as_str()),
                ("locationName", self.location.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .context("hazard api request")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("hazard api -> HTTP {status}");
        }
        let body = resp.text().await.context("hazard api body")?;
        parse_hazards(&body, &self.location, self.cap, Utc::now())
    }
}

/// Hazard source per config: the CWA client when enabled, otherwise a no-op.
pub fn from_config(client: reqwest::Client, cfg: &HazardConfig) -> Box<dyn HazardSource> {
    if cfg.enabled {
        Box::new(CwaHazardClient::new(client, cfg))
    } else {
        Box::new(DisabledHazards)
    }
}
