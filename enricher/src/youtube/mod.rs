//! Metadata source
//!
//! The YouTube Data API client and the quota-aware wrapper the orchestrator
//! calls.

mod data_api;
mod fetcher;

pub use data_api::YouTubeSource;
pub use fetcher::QuotaAwareFetcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{channel::ChannelId, error::SourceError};

/// One upload from the channel's uploads playlist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentVideo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<String>,
}

/// Channel metadata as returned by the source. Every descriptive field is
/// optional; gaps lower classification confidence but never fail a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedMetadata {
    pub channel: ChannelId,
    pub youtube_channel_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub custom_url: Option<String>,
    pub country: Option<String>,
    pub keywords: Option<String>,
    pub published_at: Option<String>,
    pub subscriber_count: Option<u64>,
    pub video_count: Option<u64>,
    pub view_count: Option<u64>,
    /// Newest first.
    pub recent_videos: Vec<RecentVideo>,
}

impl FetchedMetadata {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            youtube_channel_id: None,
            title: None,
            description: None,
            custom_url: None,
            country: None,
            keywords: None,
            published_at: None,
            subscriber_count: None,
            video_count: None,
            view_count: None,
            recent_videos: Vec::new(),
        }
    }

    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| self.channel.to_string())
    }
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Quota units one `resolve` call for this channel consumes. Known
    /// before the call is made.
    fn declared_cost(&self, channel: &ChannelId) -> u64;

    async fn resolve(&self, channel: &ChannelId) -> Result<FetchedMetadata, SourceError>;
}
