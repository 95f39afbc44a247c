use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use tokio::sync::RwLock;

use super::{EnrichmentRecord, EnrichmentStore, SCAN_PAGE_SIZE};
use crate::channel::ChannelId;

/// In-process store used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<ChannelId, EnrichmentRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn page_after(&self, after: Option<ChannelId>) -> Vec<EnrichmentRecord> {
        let records = self.records.read().await;
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        records
            .range((lower, Bound::Unbounded))
            .take(SCAN_PAGE_SIZE as usize)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

#[async_trait]
impl EnrichmentStore for MemoryStore {
    async fn lookup(&self, channel: &ChannelId) -> anyhow::Result<Option<EnrichmentRecord>> {
        Ok(self.records.read().await.get(channel).cloned())
    }

    async fn batch_lookup(
        &self,
        channels: &[ChannelId],
    ) -> anyhow::Result<HashMap<ChannelId, EnrichmentRecord>> {
        let records = self.records.read().await;
        Ok(channels
            .iter()
            .filter_map(|c| records.get(c).map(|r| (c.clone(), r.clone())))
            .collect())
    }

    async fn upsert(&self, record: &EnrichmentRecord) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        let mut record = record.clone();
        if let Some(existing) = records.get(&record.channel) {
            record.created_at = existing.created_at;
        }
        records.insert(record.channel.clone(), record);
        Ok(())
    }

    async fn upsert_many(&self, records: &[EnrichmentRecord]) -> anyhow::Result<usize> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(records.len())
    }

    fn scan_all(&self) -> BoxStream<'_, anyhow::Result<EnrichmentRecord>> {
        futures::stream::try_unfold((None::<ChannelId>, false), move |(after, done)| async move {
            if done {
                return anyhow::Ok(None);
            }
            let page = self.page_after(after).await;
            if page.is_empty() {
                return anyhow::Ok(None);
            }
            let finished = page.len() < SCAN_PAGE_SIZE as usize;
            let next = page.last().map(|r| r.channel.clone());
            anyhow::Ok(Some((
                futures::stream::iter(page.into_iter().map(anyhow::Ok)),
                (next, finished),
            )))
        })
        .try_flatten()
        .boxed()
    }

    async fn stale_channels(&self, current_version: i32) -> anyhow::Result<Vec<ChannelId>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.schema_version < current_version)
            .map(|r| r.channel.clone())
            .collect())
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
