//! YouTube Data API response types
//!
//! Data structures for deserializing YouTube Data API v3 and OAuth token
//! responses. Only the fields the sync engine reads are declared.

use bridge_traits::source::{ChannelStatistics, Thumbnails};
use serde::{Deserialize, Serialize};

/// OAuth token endpoint success response
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

/// OAuth token endpoint error response (`{"error": "invalid_grant", ...}`)
#[derive(Debug, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Data API error envelope (`{"error": {"code": 403, "message": ...}}`)
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

/// Any paginated `*.list` response
///
/// See: https://developers.google.com/youtube/v3/docs/channels/list
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Channel resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResource {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<ChannelSnippet>,
    #[serde(default)]
    pub content_details: Option<ChannelContentDetails>,
    #[serde(default)]
    pub statistics: Option<ChannelStatisticsResource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub custom_url: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// RFC 3339
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub thumbnails: ThumbnailSet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContentDetails {
    #[serde(default)]
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelatedPlaylists {
    #[serde(default)]
    pub uploads: Option<String>,
}

/// Counters arrive as decimal strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatisticsResource {
    #[serde(default)]
    pub view_count: Option<String>,
    #[serde(default)]
    pub comment_count: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<String>,
    #[serde(default)]
    pub hidden_subscriber_count: bool,
    #[serde(default)]
    pub video_count: Option<String>,
}

impl ChannelStatisticsResource {
    /// A hidden subscriber count is reported as missing, never as zero.
    pub fn to_statistics(&self) -> ChannelStatistics {
        let parse = |value: &Option<String>| value.as_deref().and_then(|v| v.parse::<u64>().ok());
        ChannelStatistics {
            view_count: parse(&self.view_count),
            comment_count: parse(&self.comment_count),
            subscriber_count: if self.hidden_subscriber_count {
                None
            } else {
                parse(&self.subscriber_count)
            },
            video_count: parse(&self.video_count),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailSet {
    #[serde(default)]
    pub default: Option<Thumbnail>,
    #[serde(default)]
    pub medium: Option<Thumbnail>,
    #[serde(default)]
    pub high: Option<Thumbnail>,
    #[serde(default)]
    pub standard: Option<Thumbnail>,
    #[serde(default)]
    pub maxres: Option<Thumbnail>,
}

impl ThumbnailSet {
    pub fn to_thumbnails(&self) -> Thumbnails {
        let url = |thumb: &Option<Thumbnail>| {
            thumb
                .as_ref()
                .map(|t| t.url.clone())
                .unwrap_or_default()
        };
        Thumbnails {
            default: url(&self.default),
            medium: url(&self.medium),
            high: url(&self.high),
            standard: url(&self.standard),
            max_res: url(&self.maxres),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

/// playlistItems resource
///
/// See: https://developers.google.com/youtube/v3/docs/playlistItems
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemResource {
    pub id: String,
    pub content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemContentDetails {
    pub video_id: String,
}

/// videos resource
///
/// See: https://developers.google.com/youtube/v3/docs/videos
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResource {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<VideoSnippet>,
    #[serde(default)]
    pub content_details: Option<VideoContentDetails>,
    #[serde(default)]
    pub status: Option<VideoStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub thumbnails: ThumbnailSet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContentDetails {
    /// ISO-8601 duration
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    /// `uploaded`, `processed`, `failed`, `rejected` or `deleted`
    #[serde(default)]
    pub upload_status: String,
    /// `public`, `unlisted` or `private`
    #[serde(default)]
    pub privacy_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_deserialization_minimal() {
        let json = r#"{"access_token": "ya29.a0"}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "ya29.a0");
        assert_eq!(response.expires_in, 3600);
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn test_statistics_strings_are_parsed() {
        let json = r#"{
            "viewCount": "1200",
            "subscriberCount": "250",
            "hiddenSubscriberCount": false,
            "videoCount": "12"
        }"#;
        let stats: ChannelStatisticsResource = serde_json::from_str(json).unwrap();
        let stats = stats.to_statistics();
        assert_eq!(stats.view_count, Some(1200));
        assert_eq!(stats.subscriber_count, Some(250));
        assert_eq!(stats.comment_count, None);
        assert_eq!(stats.video_count, Some(12));
    }

    #[test]
    fn test_hidden_subscriber_count_is_missing() {
        let json = r#"{"subscriberCount": "0", "hiddenSubscriberCount": true}"#;
        let stats: ChannelStatisticsResource = serde_json::from_str(json).unwrap();
        assert_eq!(stats.to_statistics().subscriber_count, None);
    }

    #[test]
    fn test_missing_thumbnails_become_empty_strings() {
        let json = r#"{"default": {"url": "https://i.ytimg.com/d.jpg"}, "maxres": {"url": "https://i.ytimg.com/m.jpg"}}"#;
        let set: ThumbnailSet = serde_json::from_str(json).unwrap();
        let thumbs = set.to_thumbnails();
        assert_eq!(thumbs.default, "https://i.ytimg.com/d.jpg");
        assert_eq!(thumbs.medium, "");
        assert_eq!(thumbs.max_res, "https://i.ytimg.com/m.jpg");
    }

    #[test]
    fn test_empty_list_response() {
        let response: ListResponse<ChannelResource> = serde_json::from_str("{}").unwrap();
        assert!(response.items.is_empty());
        assert!(response.next_page_token.is_none());
    }
}
