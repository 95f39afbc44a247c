//! Persistent enrichment store
//!
//! One record per canonical channel. Records are written as soon as a
//! channel is classified and are the only thing that decides whether a
//! later run skips that channel.

pub mod entity;
mod memory;
mod sql;

pub use memory::MemoryStore;
pub use sql::SeaOrmStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{channel::ChannelId, prompt::Classification};

/// Schema version written with every new record. Older versions are still
/// cache hits; only an explicit re-analysis rewrites them.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Lookups are split into chunks of this many keys.
pub const LOOKUP_CHUNK_SIZE: usize = 500;

/// Page size used by `scan_all`.
pub const SCAN_PAGE_SIZE: u64 = 500;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Classified by the reasoning service.
    Classified,
    /// Flagged from the placement name alone, without any external call.
    Keyword,
    /// Reasoning service never produced a valid answer.
    Degraded,
    /// Metadata could not be fetched after retries.
    FetchFailed,
}

impl RecordStatus {
    /// Whether the stored classification can be trusted by the report.
    pub fn is_complete(&self) -> bool {
        matches!(self, RecordStatus::Classified | RecordStatus::Keyword)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub channel: ChannelId,
    pub channel_name: Option<String>,
    pub status: RecordStatus,
    pub classification: Classification,
    pub schema_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    pub fn new(
        channel: ChannelId,
        channel_name: Option<String>,
        status: RecordStatus,
        classification: Classification,
    ) -> Self {
        let now = Utc::now();
        Self {
            channel,
            channel_name,
            status,
            classification,
            schema_version: CURRENT_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn classified(
        channel: ChannelId,
        channel_name: Option<String>,
        classification: Classification,
    ) -> Self {
        Self::new(channel, channel_name, RecordStatus::Classified, classification)
    }

    pub fn keyword(channel: ChannelId, channel_name: Option<String>, keyword: &str) -> Self {
        Self::new(
            channel,
            channel_name,
            RecordStatus::Keyword,
            Classification::keyword_match(keyword),
        )
    }

    pub fn degraded(
        channel: ChannelId,
        channel_name: Option<String>,
        sentinel: Classification,
    ) -> Self {
        Self::new(channel, channel_name, RecordStatus::Degraded, sentinel)
    }

    pub fn fetch_failed(channel: ChannelId, channel_name: Option<String>, reason: &str) -> Self {
        Self::new(
            channel,
            channel_name,
            RecordStatus::FetchFailed,
            Classification::degraded(reason),
        )
    }
}

#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    async fn lookup(&self, channel: &ChannelId) -> anyhow::Result<Option<EnrichmentRecord>>;

    /// Channels without a record are absent from the map.
    async fn batch_lookup(
        &self,
        channels: &[ChannelId],
    ) -> anyhow::Result<HashMap<ChannelId, EnrichmentRecord>>;

    /// Insert or replace. `created_at` of an existing record is kept.
    async fn upsert(&self, record: &EnrichmentRecord) -> anyhow::Result<()>;

    async fn upsert_many(&self, records: &[EnrichmentRecord]) -> anyhow::Result<usize>;

    /// Every record ordered by channel key, read page by page.
    fn scan_all(&self) -> BoxStream<'_, anyhow::Result<EnrichmentRecord>>;

    /// Channels whose record predates `current_version`.
    async fn stale_channels(&self, current_version: i32) -> anyhow::Result<Vec<ChannelId>>;

    /// Delete records created before `cutoff`. Returns how many went.
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
}
