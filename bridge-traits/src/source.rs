//! Content Source Abstraction
//!
//! Typed view of the external video platform: the owner's channel metadata
//! and the list of recent uploads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by a content source.
///
/// The engine branches on the variant: `AuthRevoked` opts the channel out,
/// everything else leaves stored state untouched until the next cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The owner revoked the grant (OAuth `invalid_grant`).
    #[error("Access revoked by owner: {0}")]
    AuthRevoked(String),

    /// Network failure, timeout, quota, or 5xx.
    #[error("Transient source error: {0}")]
    Transient(String),

    /// The source answered but the payload could not be understood.
    #[error("Malformed source response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_auth_revoked(&self) -> bool {
        matches!(self, SourceError::AuthRevoked(_))
    }
}

/// Credentials used to call the source on the owner's behalf.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCredentials {
    pub owner_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl SourceCredentials {
    pub fn new(
        owner_id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("owner_id", &self.owner_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Reference to one stored channel, enough to list its uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub channel_id: String,
    pub uploads_playlist_id: String,
    pub credentials: SourceCredentials,
}

/// Thumbnail URLs per resolution. Missing resolutions are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnails {
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub medium: String,
    #[serde(default)]
    pub high: String,
    #[serde(default)]
    pub standard: String,
    #[serde(default)]
    pub max_res: String,
}

/// Channel statistics. Each counter is optional because the source may hide
/// or omit it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    pub view_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub subscriber_count: Option<u64>,
    pub video_count: Option<u64>,
}

/// Externally-sourced channel fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub id: String,
    pub title: String,
    pub description: String,
    pub custom_url: Option<String>,
    pub country: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnails: Thumbnails,
    pub statistics: Option<ChannelStatistics>,
    pub uploads_playlist_id: String,
}

/// Upload processing status as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processing,
    Ready,
    Failed,
    Rejected,
    Unknown,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Ready => "ready",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Rejected => "rejected",
            ProcessingStatus::Unknown => "unknown",
        }
    }

    /// Parse the stored form. Unrecognized values map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => ProcessingStatus::Processing,
            "ready" => ProcessingStatus::Ready,
            "failed" => ProcessingStatus::Failed,
            "rejected" => ProcessingStatus::Rejected,
            _ => ProcessingStatus::Unknown,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Public,
    Unlisted,
    Private,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Public => "public",
            PrivacyStatus::Unlisted => "unlisted",
            PrivacyStatus::Private => "private",
        }
    }

    /// Parse the stored form. Anything unrecognized is treated as private.
    pub fn parse(s: &str) -> Self {
        match s {
            "public" => PrivacyStatus::Public,
            "unlisted" => PrivacyStatus::Unlisted,
            _ => PrivacyStatus::Private,
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally-sourced video fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub channel_id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub playlist_id: String,
    pub resource_id: String,
    pub thumbnails: Thumbnails,
    /// ISO-8601 duration (`PT4M13S`)
    pub duration: String,
    pub published_at: Option<DateTime<Utc>>,
    pub processing_status: ProcessingStatus,
    pub privacy_status: PrivacyStatus,
}

/// Content source trait
///
/// Implementations refresh OAuth tokens as needed and map provider failures
/// onto [`SourceError`]. Only a confirmed revocation may be reported as
/// `AuthRevoked`; ambiguous auth failures are `Transient`.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::{ContentSource, SourceCredentials};
///
/// async fn subscribers(source: &dyn ContentSource, creds: &SourceCredentials) -> Option<u64> {
///     let channel = source.fetch_channel(creds).await.ok()?;
///     channel.statistics?.subscriber_count
/// }
/// ```
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the owner's primary channel.
    async fn fetch_channel(
        &self,
        credentials: &SourceCredentials,
    ) -> Result<ChannelMetadata, SourceError>;

    /// Fetch every channel the owner manages.
    async fn fetch_channels(
        &self,
        credentials: &SourceCredentials,
    ) -> Result<Vec<ChannelMetadata>, SourceError> {
        Ok(vec![self.fetch_channel(credentials).await?])
    }

    /// Fetch up to `limit` of the channel's most recent uploads, newest first.
    async fn fetch_recent_videos(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<VideoMetadata>, SourceError>;
}
