//! Cumulative report
//!
//! Built from a full store scan on every invocation, so the included and
//! excluded sets depend only on what the store holds, never on what the
//! current run happened to do.

use futures::TryStreamExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    channel::ChannelId,
    enricher_config::ReportConfig,
    store::{EnrichmentRecord, EnrichmentStore},
};

/// Attribute holding the reasoning service's brand safety verdict.
const BRAND_SAFETY_KEY: &str = "brand_safety_score";

/// Decides which side of the report a completed record lands on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportPolicy {
    blocked_brand_safety_scores: Vec<String>,
}

impl ReportPolicy {
    pub fn new(blocked_brand_safety_scores: &[String]) -> Self {
        Self {
            blocked_brand_safety_scores: blocked_brand_safety_scores
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(&config.blocked_brand_safety_scores)
    }

    /// Children-directed or flagged unsafe.
    pub fn excludes(&self, record: &EnrichmentRecord) -> bool {
        if record.classification.is_children_content() == Some(true) {
            return true;
        }
        record
            .classification
            .get_str(BRAND_SAFETY_KEY)
            .map(|score| score.trim().to_lowercase())
            .is_some_and(|score| self.blocked_brand_safety_scores.contains(&score))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub channel: ChannelId,
    pub channel_name: Option<String>,
    pub confidence: Option<String>,
    pub reasoning: Option<String>,
    pub attributes: Map<String, Value>,
    /// Impressions from the current input, when the channel was in it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u64>,
}

impl From<EnrichmentRecord> for ReportRow {
    fn from(record: EnrichmentRecord) -> Self {
        let confidence = record.classification.confidence().map(str::to_string);
        let reasoning = record.classification.reasoning().map(str::to_string);
        Self {
            channel: record.channel,
            channel_name: record.channel_name,
            confidence,
            reasoning,
            attributes: record.classification.into_attributes(),
            weight: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CumulativeReport {
    pub included: Vec<ReportRow>,
    pub excluded: Vec<ReportRow>,
    /// Records in the store that carry no usable classification.
    pub omitted: u64,
}

impl CumulativeReport {
    /// Attach the current input's weights and order both lists by weight,
    /// highest first. Channels outside the input keep store order at the end.
    pub fn annotate_weights(&mut self, weights: &IndexMap<ChannelId, u64>) {
        for rows in [&mut self.included, &mut self.excluded] {
            for row in rows.iter_mut() {
                row.weight = weights.get(&row.channel).copied();
            }
            rows.sort_by(|a, b| b.weight.cmp(&a.weight));
        }
    }
}

/// Scan the whole store and split completed records with `policy`.
pub async fn build_report<S>(store: &S, policy: &ReportPolicy) -> anyhow::Result<CumulativeReport>
where
    S: EnrichmentStore + ?Sized,
{
    let mut report = CumulativeReport::default();
    let mut records = store.scan_all();

    while let Some(record) = records.try_next().await? {
        if !record.status.is_complete() {
            report.omitted += 1;
            continue;
        }
        if policy.excludes(&record) {
            report.excluded.push(record.into());
        } else {
            report.included.push(record.into());
        }
    }

    tracing::info!(
        "Report built: {} included, {} excluded, {} omitted",
        report.included.len(),
        report.excluded.len(),
        report.omitted
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::normalize,
        prompt::Classification,
        store::{EnrichmentStore, MemoryStore},
    };

    fn id(handle: &str) -> ChannelId {
        normalize(&format!("@{}", handle)).unwrap()
    }

    fn classified(handle: &str, children: bool, safety: &str) -> EnrichmentRecord {
        let attributes = serde_json::json!({
            "is_children_content": children,
            "confidence": "high",
            "reasoning": "test",
            "brand_safety_score": safety,
        });
        let Value::Object(attributes) = attributes else {
            unreachable!()
        };
        EnrichmentRecord::classified(
            id(handle),
            Some(handle.to_string()),
            Classification::from_attributes(attributes),
        )
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .upsert_many(&[
                classified("alpha", false, "safe"),
                classified("bravo", true, "safe"),
                classified("charlie", false, "Unsafe"),
                EnrichmentRecord::degraded(id("delta"), None, Classification::degraded("bad json")),
                EnrichmentRecord::fetch_failed(id("echo"), None, "channel not found"),
                EnrichmentRecord::keyword(id("foxtrot"), Some("Kids Songs".into()), "kids"),
            ])
            .await
            .unwrap();
        store
    }

    fn policy() -> ReportPolicy {
        ReportPolicy::new(&["unsafe".to_string(), "high_risk".to_string()])
    }

    fn channels(rows: &[ReportRow]) -> Vec<ChannelId> {
        rows.iter().map(|r| r.channel.clone()).collect()
    }

    #[tokio::test]
    async fn test_splits_completed_records_and_omits_the_rest() {
        let store = seeded().await;
        let report = build_report(&store, &policy()).await.unwrap();

        assert_eq!(channels(&report.included), vec![id("alpha")]);
        assert_eq!(
            channels(&report.excluded),
            vec![id("bravo"), id("charlie"), id("foxtrot")]
        );
        assert_eq!(report.omitted, 2);
        assert_eq!(report.included[0].confidence.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn test_degraded_channel_in_neither_set() {
        let store = seeded().await;
        let report = build_report(&store, &policy()).await.unwrap();

        let delta = id("delta");
        assert!(!report.included.iter().any(|r| r.channel == delta));
        assert!(!report.excluded.iter().any(|r| r.channel == delta));
    }

    #[tokio::test]
    async fn test_two_builds_are_identical() {
        let store = seeded().await;
        let first = build_report(&store, &policy()).await.unwrap();
        let second = build_report(&store, &policy()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_weights_order_rows() {
        let store = MemoryStore::new();
        for handle in ["alpha", "bravo", "charlie"] {
            store.upsert(&classified(handle, false, "safe")).await.unwrap();
        }
        let mut report = build_report(&store, &ReportPolicy::default()).await.unwrap();

        let weights: IndexMap<ChannelId, u64> =
            [(id("alpha"), 5), (id("charlie"), 50)].into_iter().collect();
        report.annotate_weights(&weights);

        assert_eq!(
            channels(&report.included),
            vec![id("charlie"), id("alpha"), id("bravo")]
        );
        assert_eq!(report.included[2].weight, None);
    }
}
