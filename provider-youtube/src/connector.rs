//! YouTube Data API connector implementation
//!
//! Implements the `ContentSource` trait for YouTube Data API v3.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::source::{
    ChannelMetadata, ChannelRef, ContentSource, PrivacyStatus, ProcessingStatus,
    SourceCredentials, SourceError, VideoMetadata,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::auth::AccessTokens;
use crate::config::YoutubeConfig;
use crate::error::{Result, YoutubeError};
use crate::retry::{execute_with_backoff, policy_for};
use crate::types::{
    ApiErrorResponse, ChannelResource, ListResponse, PlaylistItemResource, VideoResource,
};

/// Maximum results per page (YouTube Data API limit)
const MAX_PAGE_SIZE: usize = 50;

const CHANNEL_PARTS: &str = "snippet,contentDetails,statistics";
const VIDEO_PARTS: &str = "snippet,contentDetails,status";

/// YouTube Data API connector
///
/// # Features
///
/// - Channel discovery for the authorized owner
/// - Recent uploads via the uploads playlist, enriched with `videos.list`
/// - Transparent access token refresh on 401
/// - Exponential backoff for rate limiting and 5xx
///
/// # Example
///
/// ```ignore
/// use provider_youtube::{YoutubeConfig, YoutubeSource};
/// use bridge_traits::source::ContentSource;
///
/// let source = YoutubeSource::new(http_client, YoutubeConfig::from_env()?);
/// let channels = source.fetch_channels(&credentials).await?;
/// ```
pub struct YoutubeSource {
    http_client: Arc<dyn HttpClient>,
    config: YoutubeConfig,
    policy: RetryPolicy,
    tokens: AccessTokens,
}

impl YoutubeSource {
    pub fn new(http_client: Arc<dyn HttpClient>, config: YoutubeConfig) -> Self {
        let policy = policy_for(&config);
        let tokens = AccessTokens::new(http_client.clone(), config.clone());
        Self {
            http_client,
            config,
            policy,
            tokens,
        }
    }

    fn parse_timestamp(rfc3339: Option<&str>) -> Option<DateTime<Utc>> {
        rfc3339
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn processing_status(upload_status: &str) -> ProcessingStatus {
        match upload_status {
            "processed" => ProcessingStatus::Ready,
            "uploaded" => ProcessingStatus::Processing,
            "failed" => ProcessingStatus::Failed,
            "rejected" => ProcessingStatus::Rejected,
            _ => ProcessingStatus::Unknown,
        }
    }

    /// Uploads playlist ids are the channel id with `UC` swapped for `UU`.
    fn derived_uploads_playlist(channel_id: &str) -> String {
        match channel_id.strip_prefix("UC") {
            Some(rest) => format!("UU{}", rest),
            None => format!("UU{}", channel_id),
        }
    }

    fn convert_channel(resource: ChannelResource) -> ChannelMetadata {
        let snippet = resource.snippet;
        let uploads_playlist_id = resource
            .content_details
            .and_then(|details| details.related_playlists.uploads)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Self::derived_uploads_playlist(&resource.id));

        ChannelMetadata {
            title: snippet.as_ref().map(|s| s.title.clone()).unwrap_or_default(),
            description: snippet
                .as_ref()
                .map(|s| s.description.clone())
                .unwrap_or_default(),
            custom_url: snippet.as_ref().and_then(|s| s.custom_url.clone()),
            country: snippet.as_ref().and_then(|s| s.country.clone()),
            published_at: Self::parse_timestamp(
                snippet.as_ref().and_then(|s| s.published_at.as_deref()),
            ),
            thumbnails: snippet
                .as_ref()
                .map(|s| s.thumbnails.to_thumbnails())
                .unwrap_or_default(),
            statistics: resource.statistics.map(|stats| stats.to_statistics()),
            uploads_playlist_id,
            id: resource.id,
        }
    }

    fn convert_video(
        resource: VideoResource,
        playlist_id: &str,
        playlist_item_id: &str,
        fallback_channel_id: &str,
    ) -> VideoMetadata {
        let snippet = resource.snippet;
        let status = resource.status;

        VideoMetadata {
            url: format!("https://www.youtube.com/watch?v={}", resource.id),
            channel_id: snippet
                .as_ref()
                .map(|s| s.channel_id.clone())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| fallback_channel_id.to_string()),
            title: snippet.as_ref().map(|s| s.title.clone()).unwrap_or_default(),
            description: snippet
                .as_ref()
                .map(|s| s.description.clone())
                .unwrap_or_default(),
            playlist_id: playlist_id.to_string(),
            resource_id: playlist_item_id.to_string(),
            thumbnails: snippet
                .as_ref()
                .map(|s| s.thumbnails.to_thumbnails())
                .unwrap_or_default(),
            duration: resource
                .content_details
                .map(|details| details.duration)
                .unwrap_or_default(),
            published_at: Self::parse_timestamp(
                snippet.as_ref().and_then(|s| s.published_at.as_deref()),
            ),
            processing_status: status
                .as_ref()
                .map(|s| Self::processing_status(&s.upload_status))
                .unwrap_or(ProcessingStatus::Unknown),
            privacy_status: status
                .as_ref()
                .map(|s| PrivacyStatus::parse(&s.privacy_status))
                .unwrap_or(PrivacyStatus::Private),
            id: resource.id,
        }
    }

    fn api_error(response: &HttpResponse) -> YoutubeError {
        if response.status == 429 {
            let retry_after_seconds = response
                .header("Retry-After")
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(0);
            return YoutubeError::RateLimitExceeded {
                retry_after_seconds,
            };
        }

        let message = response
            .json::<ApiErrorResponse>()
            .map(|body| body.error.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).to_string());
        YoutubeError::ApiError {
            status_code: response.status,
            message,
        }
    }

    async fn send(&self, url: &str, token: &str) -> Result<HttpResponse> {
        let request = HttpRequest::get(url)
            .bearer_token(token)
            .header("Accept", "application/json")
            .timeout(self.config.request_timeout);
        execute_with_backoff(self.http_client.as_ref(), request, &self.policy).await
    }

    /// Authorized GET returning the raw response, refreshing the access token
    /// once when it is missing or rejected.
    #[instrument(skip(self, credentials), fields(owner_id = %credentials.owner_id))]
    async fn authorized_get(
        &self,
        credentials: &SourceCredentials,
        url: &str,
    ) -> Result<HttpResponse> {
        let token = match self.tokens.current(credentials).await {
            Some(token) => token,
            None => self.tokens.refresh(credentials).await?,
        };

        let response = self.send(url, &token).await?;
        if response.status != 401 {
            return Ok(response);
        }

        debug!("Access token rejected, refreshing");
        let token = self.tokens.refresh(credentials).await?;
        let response = self.send(url, &token).await?;
        if response.status == 401 {
            warn!("Refreshed access token rejected");
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        credentials: &SourceCredentials,
        url: &str,
    ) -> Result<T> {
        let response = self.authorized_get(credentials, url).await?;
        if !response.is_success() {
            return Err(Self::api_error(&response));
        }
        response
            .json()
            .map_err(|e| YoutubeError::ParseError(e.to_string()))
    }

    async fn list_channels(&self, credentials: &SourceCredentials) -> Result<Vec<ChannelMetadata>> {
        let mut channels = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}?part={}&mine=true&maxResults={}",
                self.config.api_url("channels"),
                CHANNEL_PARTS,
                MAX_PAGE_SIZE
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let page: ListResponse<ChannelResource> = self.get_json(credentials, &url).await?;
            channels.extend(page.items.into_iter().map(Self::convert_channel));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(channels)
    }

    /// Walk the uploads playlist, newest first, until `limit` items.
    async fn list_playlist_items(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<PlaylistItemResource>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        while items.len() < limit {
            let page_size = (limit - items.len()).min(MAX_PAGE_SIZE);
            let mut url = format!(
                "{}?part=contentDetails&playlistId={}&maxResults={}",
                self.config.api_url("playlistItems"),
                urlencoding::encode(&channel.uploads_playlist_id),
                page_size
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self.authorized_get(&channel.credentials, &url).await?;
            if response.status == 404 {
                // A channel without uploads has no playlist yet
                debug!(playlist_id = %channel.uploads_playlist_id, "Uploads playlist not found");
                break;
            }
            if !response.is_success() {
                return Err(Self::api_error(&response));
            }

            let page: ListResponse<PlaylistItemResource> = response
                .json()
                .map_err(|e| YoutubeError::ParseError(e.to_string()))?;
            let received = page.items.len();
            items.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() && received > 0 => page_token = Some(token),
                _ => break,
            }
        }

        items.truncate(limit);
        Ok(items)
    }

    async fn list_videos(
        &self,
        credentials: &SourceCredentials,
        ids: &[String],
    ) -> Result<HashMap<String, VideoResource>> {
        let mut videos = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_PAGE_SIZE) {
            let url = format!(
                "{}?part={}&id={}&maxResults={}",
                self.config.api_url("videos"),
                VIDEO_PARTS,
                urlencoding::encode(&chunk.join(",")),
                MAX_PAGE_SIZE
            );
            let page: ListResponse<VideoResource> = self.get_json(credentials, &url).await?;
            videos.extend(page.items.into_iter().map(|video| (video.id.clone(), video)));
        }

        Ok(videos)
    }
}

#[async_trait]
impl ContentSource for YoutubeSource {
    #[instrument(skip(self, credentials), fields(owner_id = %credentials.owner_id))]
    async fn fetch_channel(
        &self,
        credentials: &SourceCredentials,
    ) -> std::result::Result<ChannelMetadata, SourceError> {
        let channel = self
            .list_channels(credentials)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| YoutubeError::ChannelNotFound {
                owner_id: credentials.owner_id.clone(),
            })?;
        Ok(channel)
    }

    #[instrument(skip(self, credentials), fields(owner_id = %credentials.owner_id))]
    async fn fetch_channels(
        &self,
        credentials: &SourceCredentials,
    ) -> std::result::Result<Vec<ChannelMetadata>, SourceError> {
        let channels = self.list_channels(credentials).await?;
        info!(channels = channels.len(), "Fetched owner channels");
        Ok(channels)
    }

    #[instrument(skip(self, channel), fields(channel_id = %channel.channel_id, limit = limit))]
    async fn fetch_recent_videos(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> std::result::Result<Vec<VideoMetadata>, SourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let items = self.list_playlist_items(channel, limit).await?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = items
            .iter()
            .map(|item| item.content_details.video_id.clone())
            .collect();
        let mut details = self.list_videos(&channel.credentials, &ids).await?;

        let mut videos = Vec::with_capacity(items.len());
        for item in items {
            match details.remove(&item.content_details.video_id) {
                Some(resource) => videos.push(Self::convert_video(
                    resource,
                    &channel.uploads_playlist_id,
                    &item.id,
                    &channel.channel_id,
                )),
                None => debug!(
                    video_id = %item.content_details.video_id,
                    "Playlist item without video details skipped"
                ),
            }
        }

        info!(videos = videos.len(), "Fetched recent uploads");
        Ok(videos)
    }
}
