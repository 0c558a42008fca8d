// src/config/alerts.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::ingest::types::{SourceDescriptor, SourceKind};

pub const ENV_CONFIG_PATH: &str = "ALERTS_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/alerts.toml";

const ENV_ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
const ENV_RENDER_URL: &str = "RENDER_EXTERNAL_URL";
const ENV_CWA_API_KEY: &str = "CWA_API_KEY";
const CWA_DEMO_KEY: &str = "CWA-DEMO-KEY";

/// Everything the alert subsystem reads at startup. Nothing here changes at runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub sources: Vec<SourceDescriptor>,
    pub cache: CacheConfig,
    pub stream: StreamConfig,
    pub fetch: FetchConfig,
    pub alerts: AlertRules,
    pub hazard: HazardConfig,
    pub server: ServerConfig,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            cache: CacheConfig::default(),
            stream: StreamConfig::default(),
            fetch: FetchConfig::default(),
            alerts: AlertRules::default(),
            hazard: HazardConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor::new(
            SourceKind::StructuredFeed,
            "CWA Earthquake",
            "https://www.cwa.gov.tw/Data/service/eqk_rss.xml",
        ),
        SourceDescriptor::new(
            SourceKind::ListingScrape,
            "WRA News",
            "https://www.wra.gov.tw/News.aspx?n=7314",
        ),
        SourceDescriptor::new(
            SourceKind::ListingScrape,
            "Forestry Agency",
            "https://www.fa.gov.tw/cht/index.php?code=list&flag=detail&ids=23",
        ),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 60 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub interval_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl StreamConfig {
    pub fn interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Per-kind fetch limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub feed_timeout_secs: u64,
    pub listing_timeout_secs: u64,
    pub feed_item_cap: usize,
    pub listing_item_cap: usize,
    /// Anchor text must be strictly longer than this (in chars) to count as a listing entry.
    pub listing_min_title_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; relief-alerts/0.1)".to_string(),
            feed_timeout_secs: 10,
            listing_timeout_secs: 10,
            feed_item_cap: 15,
            listing_item_cap: 30,
            listing_min_title_chars: 6,
        }
    }
}

/// Maps a provenance name to a display category when any `contains` needle matches
/// (case-insensitive).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CategoryRule {
    pub contains: Vec<String>,
    pub category: String,
}

impl CategoryRule {
    pub fn new(contains: &[&str], category: &str) -> Self {
        Self {
            contains: contains.iter().map(|s| s.to_string()).collect(),
            category: category.to_string(),
        }
    }

    pub fn matches(&self, source: &str) -> bool {
        let hay = source.to_lowercase();
        self.contains
            .iter()
            .any(|needle| hay.contains(&needle.to_lowercase()))
    }
}

/// Relevance keywords, severity keywords and formatting caps for `/api/alerts`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertRules {
    pub relevance_keywords: Vec<String>,
    pub critical_keywords: Vec<String>,
    pub warning_keywords: Vec<String>,
    pub categories: Vec<CategoryRule>,
    pub default_category: String,
    pub default_content: String,
    pub max_aggregated: usize,
    pub max_alerts: usize,
}

fn strings(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            relevance_keywords: strings(&[
                "花蓮", "光復", "馬太鞍", "東部", "颱風", "地震", "豪雨", "淹水",
            ]),
            critical_keywords: strings(&["紅色", "嚴重"]),
            warning_keywords: strings(&["橙色", "警戒", "颱風"]),
            categories: vec![
                CategoryRule::new(&["地震", "earthquake"], "地震資訊"),
                CategoryRule::new(&["CWA"], "氣象警報"),
            ],
            default_category: "災害資訊".to_string(),
            default_content: "請點擊查看詳細資訊".to_string(),
            max_aggregated: 6,
            max_alerts: 8,
        }
    }
}

/// Best-effort CWA hazard warnings (W-C0033-001).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// "ENV" means: read from CWA_API_KEY, falling back to the public demo key.
    pub api_key: String,
    pub location: String,
    pub per_location_cap: usize,
    pub timeout_secs: u64,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://opendata.cwa.gov.tw/api/v1/rest/datastore/W-C0033-001".to_string(),
            api_key: "ENV".to_string(),
            location: "花蓮縣".to_string(),
            per_location_cap: 2,
            timeout_secs: 5,
        }
    }
}

impl HazardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:5001".to_string(),
                "http://127.0.0.1:5001".to_string(),
                "http://localhost:5500".to_string(),
                "http://127.0.0.1:5500".to_string(),
            ],
        }
    }
}

/// Load config from an explicit TOML path, then apply env overrides.
pub fn load_from(path: &Path) -> Result<AlertsConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading alerts config from {}", path.display()))?;
    let cfg = parse_toml(&content)
        .with_context(|| format!("parsing alerts config at {}", path.display()))?;
    Ok(apply_env(cfg))
}

/// Load config using env var + fallbacks:
/// 1) $ALERTS_CONFIG_PATH
/// 2) config/alerts.toml
/// 3) built-in defaults
pub fn load_default() -> Result<AlertsConfig> {
    if let Ok(p) = env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        } else {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    Ok(apply_env(AlertsConfig::default()))
}

fn parse_toml(s: &str) -> Result<AlertsConfig> {
    let mut cfg: AlertsConfig = toml::from_str(s)?;
    cfg.sources.retain(|src| {
        let keep = !src.name.trim().is_empty() && !src.url.trim().is_empty();
        if !keep {
            tracing::warn!(name = %src.name, url = %src.url, "dropping incomplete source entry");
        }
        keep
    });
    Ok(cfg)
}

fn apply_env(mut cfg: AlertsConfig) -> AlertsConfig {
    if cfg.hazard.api_key.trim().eq_ignore_ascii_case("env") {
        cfg.hazard.api_key = env::var(ENV_CWA_API_KEY)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| CWA_DEMO_KEY.to_string());
    }

    let extra = env::var(ENV_ALLOWED_ORIGINS).unwrap_or_default();
    let render = env::var(ENV_RENDER_URL).unwrap_or_default();
    let mut origins = cfg.server.allowed_origins;
    origins.extend(extra.split(',').map(str::trim).map(str::to_string));
    origins.push(render.trim().to_string());
    cfg.server.allowed_origins = clean_list(origins);

    cfg
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_string());
        }
    }
    set.into_iter().collect()
}
