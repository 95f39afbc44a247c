use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Arc, Mutex,
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::time::Duration;

use crate::{
    channel::{ChannelId, ChannelKind},
    delivery::ReportDelivery,
    error::{ReasoningError, SourceError},
    pipeline::RunSummary,
    prompt::{PromptRequest, ReasoningService},
    report::CumulativeReport,
    store::{EnrichmentRecord, EnrichmentStore, MemoryStore},
    youtube::{FetchedMetadata, MetadataSource, RecentVideo},
};

// ============================================================================
// Metadata source
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceReply {
    Ok,
    NotFound,
    Quota,
    Transport,
    /// Answers after the given delay.
    Slow(Duration),
    /// Never answers within any sane call timeout.
    Hang,
}

#[derive(Default)]
struct SourceState {
    scripts: HashMap<ChannelId, VecDeque<SourceReply>>,
    calls: HashMap<ChannelId, u32>,
}

/// Scripted metadata source. Channels without a script always resolve.
#[derive(Clone)]
pub struct FakeSource {
    cost: u64,
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new(cost: u64) -> Self {
        Self {
            cost,
            state: Arc::new(Mutex::new(SourceState::default())),
        }
    }

    pub fn script(&self, channel: &ChannelId, replies: Vec<SourceReply>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(channel.clone(), replies.into());
    }

    pub fn calls_for(&self, channel: &ChannelId) -> u32 {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.state.lock().unwrap().calls.values().sum()
    }

    fn next_reply(&self, channel: &ChannelId) -> SourceReply {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(channel.clone()).or_default() += 1;
        state
            .scripts
            .get_mut(channel)
            .and_then(|replies| replies.pop_front())
            .unwrap_or(SourceReply::Ok)
    }
}

fn fake_metadata(channel: &ChannelId) -> FetchedMetadata {
    let name = match channel.kind() {
        ChannelKind::Handle(name) | ChannelKind::Custom(name) | ChannelKind::User(name) => name,
        ChannelKind::Id(id) => id,
    };
    let mut metadata = FetchedMetadata::new(channel.clone());
    metadata.title = Some(name.to_string());
    metadata.description = Some(format!("Videos from {}", name));
    metadata.subscriber_count = Some(1_000);
    metadata.recent_videos = vec![RecentVideo {
        title: Some(format!("{} weekly", name)),
        ..Default::default()
    }];
    metadata
}

#[async_trait]
impl MetadataSource for FakeSource {
    fn declared_cost(&self, _channel: &ChannelId) -> u64 {
        self.cost
    }

    async fn resolve(&self, channel: &ChannelId) -> Result<FetchedMetadata, SourceError> {
        match self.next_reply(channel) {
            SourceReply::Ok => Ok(fake_metadata(channel)),
            SourceReply::NotFound => Err(SourceError::NotFound),
            SourceReply::Quota => Err(SourceError::QuotaExceeded("daily limit".to_string())),
            SourceReply::Transport => Err(SourceError::Request("connection reset".to_string())),
            SourceReply::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(fake_metadata(channel))
            }
            SourceReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(fake_metadata(channel))
            }
        }
    }
}

// ============================================================================
// Reasoning service
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonerReply {
    /// Not children content, high confidence.
    Valid,
    Children,
    Malformed,
    RateLimited,
    Rejected,
    Unauthorized,
    QuotaExhausted,
}

#[derive(Default)]
struct ReasonerState {
    scripts: HashMap<String, VecDeque<ReasonerReply>>,
    calls: HashMap<String, u32>,
}

/// Scripted reasoning service, keyed by the channel name in the prompt.
#[derive(Clone, Default)]
pub struct FakeReasoner {
    state: Arc<Mutex<ReasonerState>>,
}

impl FakeReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str, replies: Vec<ReasonerReply>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(name.to_string(), replies.into());
    }

    pub fn calls_for(&self, name: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.state.lock().unwrap().calls.values().sum()
    }
}

fn channel_name(request: &PromptRequest) -> String {
    request
        .user
        .lines()
        .find_map(|line| line.trim().strip_prefix("Channel name:"))
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl ReasoningService for FakeReasoner {
    async fn complete(&self, request: &PromptRequest) -> Result<String, ReasoningError> {
        let name = channel_name(request);
        let reply = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(name.clone()).or_default() += 1;
            state
                .scripts
                .get_mut(&name)
                .and_then(|replies| replies.pop_front())
                .unwrap_or(ReasonerReply::Valid)
        };

        match reply {
            ReasonerReply::Valid => Ok(serde_json::json!({
                "is_children_content": false,
                "confidence": "high",
                "reasoning": format!("{} publishes general audience videos", name),
                "brand_safety_score": "safe",
            })
            .to_string()),
            ReasonerReply::Children => Ok(serde_json::json!({
                "is_children_content": true,
                "confidence": "medium",
                "reasoning": "Cartoons and nursery songs",
            })
            .to_string()),
            ReasonerReply::Malformed => Ok("I think this channel is fine.".to_string()),
            ReasonerReply::RateLimited => {
                Err(ReasoningError::RateLimited("slow down".to_string()))
            }
            ReasonerReply::Rejected => {
                Err(ReasoningError::Rejected("maximum context length exceeded".to_string()))
            }
            ReasonerReply::Unauthorized => {
                Err(ReasoningError::Unauthorized("invalid api key".to_string()))
            }
            ReasonerReply::QuotaExhausted => {
                Err(ReasoningError::QuotaExhausted("insufficient_quota".to_string()))
            }
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// In-memory store whose writes can be made to fail per channel.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_upserts: Mutex<HashSet<ChannelId>>,
    failing_lookups: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_upserts_for(&self, channel: &ChannelId) {
        self.failing_upserts.lock().unwrap().insert(channel.clone());
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.failing_lookups.store(fail, Relaxed);
    }

    pub fn heal(&self) {
        self.failing_upserts.lock().unwrap().clear();
        self.failing_lookups.store(false, Relaxed);
    }

    fn check_upsert(&self, record: &EnrichmentRecord) -> anyhow::Result<()> {
        if self.failing_upserts.lock().unwrap().contains(&record.channel) {
            return Err(anyhow!("write to {} refused", record.channel));
        }
        Ok(())
    }

    fn check_lookup(&self) -> anyhow::Result<()> {
        if self.failing_lookups.load(Relaxed) {
            return Err(anyhow!("store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EnrichmentStore for FlakyStore {
    async fn lookup(&self, channel: &ChannelId) -> anyhow::Result<Option<EnrichmentRecord>> {
        self.check_lookup()?;
        self.inner.lookup(channel).await
    }

    async fn batch_lookup(
        &self,
        channels: &[ChannelId],
    ) -> anyhow::Result<HashMap<ChannelId, EnrichmentRecord>> {
        self.check_lookup()?;
        self.inner.batch_lookup(channels).await
    }

    async fn upsert(&self, record: &EnrichmentRecord) -> anyhow::Result<()> {
        self.check_upsert(record)?;
        self.inner.upsert(record).await
    }

    async fn upsert_many(&self, records: &[EnrichmentRecord]) -> anyhow::Result<usize> {
        for record in records {
            self.check_upsert(record)?;
        }
        self.inner.upsert_many(records).await
    }

    fn scan_all(&self) -> BoxStream<'_, anyhow::Result<EnrichmentRecord>> {
        self.inner.scan_all()
    }

    async fn stale_channels(&self, current_version: i32) -> anyhow::Result<Vec<ChannelId>> {
        self.inner.stale_channels(current_version).await
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        self.inner.purge_created_before(cutoff).await
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Keeps every delivered report; can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingDelivery {
    delivered: Arc<Mutex<Vec<(CumulativeReport, RunSummary)>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let delivery = Self::default();
        delivery.fail.store(true, Relaxed);
        delivery
    }

    pub fn delivered(&self) -> Vec<(CumulativeReport, RunSummary)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportDelivery for RecordingDelivery {
    async fn deliver(
        &self,
        report: &CumulativeReport,
        summary: &RunSummary,
    ) -> anyhow::Result<()> {
        if self.fail.load(Relaxed) {
            return Err(anyhow!("smtp relay unreachable"));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((report.clone(), summary.clone()));
        Ok(())
    }
}
