use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use tokio::time::Duration;

use super::{FetchedMetadata, MetadataSource, RecentVideo};
use crate::{
    channel::{ChannelId, ChannelKind},
    enricher_config::{FetchConfig, QuotaCosts},
    error::SourceError,
    HttpClient,
};

const CHANNEL_PARTS: &str = "snippet,statistics,brandingSettings,contentDetails";

/// YouTube Data API v3 client.
pub struct YouTubeSource {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
    recent_videos: u32,
    timeout: Duration,
    costs: QuotaCosts,
}

impl YouTubeSource {
    pub fn new(http_client: HttpClient, api_key: String, config: &FetchConfig) -> Self {
        Self {
            http_client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            recent_videos: config.recent_videos,
            timeout: Duration::from_secs(config.timeout_secs),
            costs: config.costs,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let resp = self
            .http_client
            .get(format!("{}/{}", self.base_url, method))
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SourceError::from_response(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| SourceError::Malformed(format!("{}: {}", method, e)))
    }

    async fn list_channel(&self, filter: (&str, &str)) -> Result<ChannelResource, SourceError> {
        let resp: ChannelListResponse = self
            .get_json("channels", &[("part", CHANNEL_PARTS), filter])
            .await?;
        resp.items.into_iter().next().ok_or(SourceError::NotFound)
    }

    /// Legacy `/c/` names have no direct lookup and need a search first.
    async fn search_channel_id(&self, name: &str) -> Result<String, SourceError> {
        let resp: SearchListResponse = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("maxResults", "1"),
                    ("q", name),
                ],
            )
            .await?;

        resp.items
            .into_iter()
            .find_map(|item| {
                item.id
                    .and_then(|id| id.channel_id)
                    .or_else(|| item.snippet.and_then(|s| s.channel_id))
            })
            .ok_or(SourceError::NotFound)
    }

    async fn recent_uploads(&self, playlist_id: &str) -> Result<Vec<RecentVideo>, SourceError> {
        let max_results = self.recent_videos.to_string();
        let resp: PlaylistItemsResponse = self
            .get_json(
                "playlistItems",
                &[
                    ("part", "snippet"),
                    ("playlistId", playlist_id),
                    ("maxResults", max_results.as_str()),
                ],
            )
            .await?;

        Ok(resp
            .items
            .into_iter()
            .filter_map(|item| item.snippet)
            .map(|s| RecentVideo {
                title: s.title,
                description: s.description,
                published_at: s.published_at,
            })
            .collect())
    }
}

#[async_trait]
impl MetadataSource for YouTubeSource {
    fn declared_cost(&self, channel: &ChannelId) -> u64 {
        let lookup = self.costs.channels_list + self.costs.playlist_items;
        match channel.kind() {
            ChannelKind::Custom(_) => lookup + self.costs.search,
            _ => lookup,
        }
    }

    async fn resolve(&self, channel: &ChannelId) -> Result<FetchedMetadata, SourceError> {
        let resource = match channel.kind() {
            ChannelKind::Id(id) => self.list_channel(("id", id)).await?,
            ChannelKind::Handle(handle) => {
                let handle = format!("@{}", handle);
                self.list_channel(("forHandle", handle.as_str())).await?
            }
            ChannelKind::User(name) => self.list_channel(("forUsername", name)).await?,
            ChannelKind::Custom(name) => {
                let id = self.search_channel_id(name).await?;
                self.list_channel(("id", id.as_str())).await?
            }
        };

        let uploads = resource
            .content_details
            .as_ref()
            .and_then(|d| d.related_playlists.as_ref())
            .and_then(|p| p.uploads.clone());

        let mut metadata = resource.into_metadata(channel.clone());

        if let Some(playlist_id) = uploads {
            match self.recent_uploads(&playlist_id).await {
                Ok(videos) => metadata.recent_videos = videos,
                Err(e @ SourceError::QuotaExceeded(_)) => return Err(e),
                Err(e) => {
                    tracing::debug!("No recent uploads for {}: {}", channel, e);
                }
            }
        }

        Ok(metadata)
    }
}

// -- Wire types

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    id: String,
    snippet: Option<ChannelSnippet>,
    statistics: Option<ChannelStatistics>,
    branding_settings: Option<BrandingSettings>,
    content_details: Option<ChannelContentDetails>,
}

impl ChannelResource {
    fn into_metadata(self, channel: ChannelId) -> FetchedMetadata {
        let mut metadata = FetchedMetadata::new(channel);
        metadata.youtube_channel_id = Some(self.id);

        if let Some(snippet) = self.snippet {
            metadata.title = snippet.title;
            metadata.description = snippet.description;
            metadata.custom_url = snippet.custom_url;
            metadata.country = snippet.country;
            metadata.published_at = snippet.published_at;
        }
        if let Some(stats) = self.statistics {
            // Counts arrive as strings; hidden subscriber counts are omitted
            metadata.subscriber_count = stats.subscriber_count.and_then(|c| c.parse().ok());
            metadata.video_count = stats.video_count.and_then(|c| c.parse().ok());
            metadata.view_count = stats.view_count.and_then(|c| c.parse().ok());
        }
        metadata.keywords = self
            .branding_settings
            .and_then(|b| b.channel)
            .and_then(|c| c.keywords);

        metadata
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    title: Option<String>,
    description: Option<String>,
    custom_url: Option<String>,
    country: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrandingSettings {
    channel: Option<BrandingChannel>,
}

#[derive(Debug, Deserialize)]
struct BrandingChannel {
    keywords: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: Option<SearchResultId>,
    snippet: Option<SearchSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: Option<PlaylistItemSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
}
