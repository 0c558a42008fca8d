// src/alerts.rs
//
// Relevance filter and formatter behind `GET /api/alerts`.
use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::config::AlertRules;
use crate::hazard::HazardSource;
use crate::ingest::types::RawItem;

pub const SYSTEM_SOURCE: &str = "災害監控系統";
pub const SYSTEM_CATEGORY: &str = "系統狀態";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Display-ready alert. Rebuilt on every request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    pub level: AlertLevel,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

pub fn is_relevant(title: &str, rules: &AlertRules) -> bool {
    rules
        .relevance_keywords
        .iter()
        .any(|k| title.contains(k.as_str()))
}

/// Critical keywords win over warning keywords.
pub fn classify_level(title: &str, rules: &AlertRules) -> AlertLevel {
    let has_any = |keys: &[String]| keys.iter().any(|k| title.contains(k.as_str()));
    if has_any(&rules.critical_keywords) {
        AlertLevel::Critical
    } else if has_any(&rules.warning_keywords) {
        AlertLevel::Warning
    } else {
        AlertLevel::Info
    }
}

pub fn infer_category(source: &str, rules: &AlertRules) -> String {
    rules
        .categories
        .iter()
        .find(|r| r.matches(source))
        .map(|r| r.category.clone())
        .unwrap_or_else(|| rules.default_category.clone())
}

fn format_item(index: usize, item: &RawItem, batch_ms: i64, rules: &AlertRules) -> AlertRecord {
    let title = item.title.clone().unwrap_or_default();
    AlertRecord {
        id: format!("agg-{index}-{batch_ms}"),
        level: classify_level(&title, rules),
        content: item
            .summary
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| rules.default_content.clone()),
        timestamp: item.published_at,
        category: infer_category(&item.source, rules),
        source: item.source.clone(),
        link: item.link.clone(),
        title,
    }
}

/// Map the first `max_aggregated` relevant items to alert records.
pub fn format_relevant(
    items: &[RawItem],
    rules: &AlertRules,
    now: DateTime<Utc>,
) -> Vec<AlertRecord> {
    let batch_ms = now.timestamp_millis();
    items
        .iter()
        .filter(|i| i.title.as_deref().is_some_and(|t| is_relevant(t, rules)))
        .take(rules.max_aggregated)
        .enumerate()
        .map(|(idx, item)| format_item(idx, item, batch_ms, rules))
        .collect()
}

fn system_record(prefix: &str, title: &str, content: &str, now: DateTime<Utc>) -> AlertRecord {
    AlertRecord {
        id: format!("{prefix}-{}", now.timestamp_millis()),
        title: title.to_string(),
        content: content.to_string(),
        level: AlertLevel::Info,
        timestamp: now,
        source: SYSTEM_SOURCE.to_string(),
        category: SYSTEM_CATEGORY.to_string(),
        link: None,
    }
}

/// Shown when nothing relevant is going on.
pub fn normal_placeholder(now: DateTime<Utc>) -> AlertRecord {
    system_record(
        "status",
        "災害監控系統運作正常",
        "目前光復鄉各項災害監測指標正常，系統持續監控中。如有緊急狀況將立即發布警報通知。",
        now,
    )
}

/// Shown when the pipeline itself failed.
pub fn unavailable_placeholder(now: DateTime<Utc>) -> AlertRecord {
    system_record(
        "error",
        "災害監控系統運作中",
        "系統暫時無法取得最新警報資料，正在嘗試重新連線。請持續關注官方災害資訊發布。",
        now,
    )
}

#[derive(Clone)]
pub struct AlertService {
    aggregator: Arc<Aggregator>,
    hazards: Arc<dyn HazardSource>,
    rules: Arc<AlertRules>,
}

impl AlertService {
    pub fn new(
        aggregator: Arc<Aggregator>,
        hazards: Arc<dyn HazardSource>,
        rules: AlertRules,
    ) -> Self {
        Self {
            aggregator,
            hazards,
            rules: Arc::new(rules),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Always between 1 and `max_alerts` records; failures surface as a placeholder.
    pub async fn build_alerts(&self) -> Vec<AlertRecord> {
        match self.try_build_alerts().await {
            Ok(alerts) => alerts,
            Err(e) => {
                tracing::warn!(error = ?e, "alert pipeline failed; serving placeholder");
                counter!("alerts_pull_fallback_total").increment(1);
                vec![unavailable_placeholder(Utc::now())]
            }
        }
    }

    async fn try_build_alerts(&self) -> Result<Vec<AlertRecord>> {
        let items = self.aggregator.get_aggregated_items().await?;
        let now = Utc::now();
        let mut alerts = format_relevant(&items, &self.rules, now);

        match self.hazards.fetch_hazards().await {
            Ok(extra) => alerts.extend(extra),
            Err(e) => {
                tracing::warn!(error = ?e, "hazard api unavailable");
                counter!("alerts_hazard_errors_total").increment(1);
            }
        }

        if alerts.is_empty() {
            alerts.push(normal_placeholder(now));
        }
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts.truncate(self.rules.max_alerts.max(1));
        Ok(alerts)
    }
}
