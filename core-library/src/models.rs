//! Domain models for the channel and video mirror
//!
//! Externally-sourced fields are refreshed on every reconciliation; locally
//! owned fields (status, flags, linkage, publish state) only change through
//! the engine's own operations.

use crate::error::{LibraryError, Result};
use bridge_traits::publishing::RecordHandle;
use bridge_traits::source::{
    ChannelMetadata, ChannelRef, ChannelStatistics, PrivacyStatus, ProcessingStatus,
    SourceCredentials, Thumbnails, VideoMetadata,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Participation Status
// =============================================================================

/// Administrative status of a channel.
///
/// ```text
/// Unverified ⇄ Verified
///     │  └──────┬──────┘
///     │         ├──→ Suspended ──→ Unverified
///     │         └──→ OptedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipationStatus {
    Unverified,
    Verified,
    Suspended,
    OptedOut,
}

impl ParticipationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Unverified => "Unverified",
            ParticipationStatus::Verified => "Verified",
            ParticipationStatus::Suspended => "Suspended",
            ParticipationStatus::OptedOut => "OptedOut",
        }
    }

    /// Statuses whose channels may be ingested when `should_sync` is set.
    pub fn is_ingestible(&self) -> bool {
        matches!(
            self,
            ParticipationStatus::Unverified | ParticipationStatus::Verified
        )
    }

    /// Statuses that force `should_sync = false`.
    pub fn blocks_sync(&self) -> bool {
        !self.is_ingestible()
    }

    pub fn can_transition_to(&self, to: ParticipationStatus) -> bool {
        use ParticipationStatus::*;
        matches!(
            (self, to),
            (Unverified, Verified)
                | (Verified, Unverified)
                | (Unverified | Verified, Suspended)
                | (Unverified | Verified, OptedOut)
                | (Suspended, Unverified)
        )
    }

    pub fn validate_transition(&self, to: ParticipationStatus) -> Result<()> {
        if self.can_transition_to(to) {
            return Ok(());
        }
        Err(LibraryError::InvalidStateTransition {
            from: self.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: format!(
                "Channel status cannot move from {} to {}",
                self.as_str(),
                to.as_str()
            ),
        })
    }
}

impl FromStr for ParticipationStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Unverified" => Ok(ParticipationStatus::Unverified),
            "Verified" => Ok(ParticipationStatus::Verified),
            "Suspended" => Ok(ParticipationStatus::Suspended),
            "OptedOut" => Ok(ParticipationStatus::OptedOut),
            other => Err(LibraryError::InvalidInput {
                field: "participation_status".to_string(),
                message: format!("Unknown participation status: {}", other),
            }),
        }
    }
}

impl fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Video State
// =============================================================================

/// Publish pipeline state. Declaration order is the monotonic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VideoState {
    New,
    PublishFailed,
    Publishing,
    PublishSucceeded,
    UploadStarted,
    UploadFailed,
    UploadSucceeded,
}

impl VideoState {
    pub const ALL: [VideoState; 7] = [
        VideoState::New,
        VideoState::PublishFailed,
        VideoState::Publishing,
        VideoState::PublishSucceeded,
        VideoState::UploadStarted,
        VideoState::UploadFailed,
        VideoState::UploadSucceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoState::New => "New",
            VideoState::PublishFailed => "PublishFailed",
            VideoState::Publishing => "Publishing",
            VideoState::PublishSucceeded => "PublishSucceeded",
            VideoState::UploadStarted => "UploadStarted",
            VideoState::UploadFailed => "UploadFailed",
            VideoState::UploadSucceeded => "UploadSucceeded",
        }
    }

    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// The record exists in the publishing backend.
    pub fn is_published(&self) -> bool {
        *self >= VideoState::PublishSucceeded
    }

    /// A publish attempt is still owed.
    pub fn needs_attention(&self) -> bool {
        matches!(self, VideoState::New | VideoState::PublishFailed)
    }

    /// A worker has claimed the video and not recorded an outcome yet.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, VideoState::Publishing | VideoState::UploadStarted)
    }

    pub fn can_transition_to(&self, to: VideoState) -> bool {
        use VideoState::*;
        matches!(
            (self, to),
            (New | PublishFailed, Publishing)
                | (Publishing, PublishSucceeded | PublishFailed | Publishing)
                | (PublishSucceeded | UploadFailed, UploadStarted)
                | (UploadStarted, UploadSucceeded | UploadFailed | UploadStarted)
        )
    }

    pub fn validate_transition(&self, to: VideoState) -> Result<()> {
        if self.can_transition_to(to) {
            return Ok(());
        }
        Err(LibraryError::InvalidStateTransition {
            from: self.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: format!("Cannot transition from {} to {}", self.as_str(), to.as_str()),
        })
    }
}

impl FromStr for VideoState {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        VideoState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| LibraryError::InvalidInput {
                field: "state".to_string(),
                message: format!("Unknown video state: {}", s),
            })
    }
}

impl fmt::Display for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Channel
// =============================================================================

/// A mirrored source channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub user_id: String,
    pub email: String,

    // External metadata
    pub title: String,
    pub description: String,
    pub custom_url: Option<String>,
    pub country: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnails: Thumbnails,
    pub statistics: Option<ChannelStatistics>,
    pub uploads_playlist_id: String,

    // Locally owned
    pub participation_status: ParticipationStatus,
    pub should_sync: bool,
    pub last_acted_at: Option<DateTime<Utc>>,
    pub access_token: String,
    pub refresh_token: String,
    pub target_channel_id: Option<i64>,
    pub referrer_channel_id: Option<i64>,
    pub video_category_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// A freshly discovered channel, `Unverified`.
    pub fn discovered(
        metadata: ChannelMetadata,
        user: &User,
        should_sync: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: metadata.id,
            user_id: user.id.clone(),
            email: user.email.clone(),
            title: metadata.title,
            description: metadata.description,
            custom_url: metadata.custom_url,
            country: metadata.country,
            published_at: metadata.published_at,
            thumbnails: metadata.thumbnails,
            statistics: metadata.statistics,
            uploads_playlist_id: metadata.uploads_playlist_id,
            participation_status: ParticipationStatus::Unverified,
            should_sync,
            last_acted_at: None,
            access_token: user.access_token.clone(),
            refresh_token: user.refresh_token.clone(),
            target_channel_id: None,
            referrer_channel_id: None,
            video_category_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ingestible(&self) -> bool {
        self.participation_status.is_ingestible() && self.should_sync
    }

    pub fn subscriber_count(&self) -> Option<u64> {
        self.statistics.and_then(|s| s.subscriber_count)
    }

    pub fn credentials(&self) -> SourceCredentials {
        SourceCredentials::new(&self.user_id, &self.access_token, &self.refresh_token)
    }

    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef {
            channel_id: self.id.clone(),
            uploads_playlist_id: self.uploads_playlist_id.clone(),
            credentials: self.credentials(),
        }
    }

    /// Check record-level invariants before persisting.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Channel id cannot be empty".to_string());
        }

        if self.user_id.trim().is_empty() {
            return Err("Channel user id cannot be empty".to_string());
        }

        if self.should_sync && self.participation_status.blocks_sync() {
            return Err(format!(
                "A {} channel cannot have should_sync enabled",
                self.participation_status
            ));
        }

        if let (Some(referrer), Some(target)) = (self.referrer_channel_id, self.target_channel_id) {
            if referrer == target {
                return Err("Referrer cannot be the channel's own linkage".to_string());
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("title", &self.title)
            .field("participation_status", &self.participation_status)
            .field("should_sync", &self.should_sync)
            .field("last_acted_at", &self.last_acted_at)
            .field("statistics", &self.statistics)
            .field("target_channel_id", &self.target_channel_id)
            .field("referrer_channel_id", &self.referrer_channel_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Video
// =============================================================================

/// A mirrored upload and its publish pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub channel_id: String,

    // External metadata
    pub url: String,
    pub title: String,
    pub description: String,
    pub playlist_id: String,
    pub resource_id: String,
    pub thumbnails: Thumbnails,
    pub duration: String,
    pub published_at: Option<DateTime<Utc>>,
    pub processing_status: ProcessingStatus,
    pub privacy_status: PrivacyStatus,

    // Locally owned
    pub state: VideoState,
    pub publish_handle: Option<RecordHandle>,
    pub created_at: DateTime<Utc>,
    /// Time of the last local state change
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// First sighting of an upload, `New`.
    pub fn observed(metadata: VideoMetadata, now: DateTime<Utc>) -> Self {
        Self {
            id: metadata.id,
            channel_id: metadata.channel_id,
            url: metadata.url,
            title: metadata.title,
            description: metadata.description,
            playlist_id: metadata.playlist_id,
            resource_id: metadata.resource_id,
            thumbnails: metadata.thumbnails,
            duration: metadata.duration,
            published_at: metadata.published_at,
            processing_status: metadata.processing_status,
            privacy_status: metadata.privacy_status,
            state: VideoState::New,
            publish_handle: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Processing finished and the video is visible to others.
    pub fn is_publishable(&self) -> bool {
        self.processing_status == ProcessingStatus::Ready
            && self.privacy_status != PrivacyStatus::Private
    }

    /// Move to `to`, stamping `updated_at`. Rejects edges outside the
    /// pipeline graph.
    pub fn transition(&mut self, to: VideoState, now: DateTime<Utc>) -> Result<()> {
        self.state.validate_transition(to)?;
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Video id cannot be empty".to_string());
        }

        if self.channel_id.trim().is_empty() {
            return Err("Video channel id cannot be empty".to_string());
        }

        if self.state.is_published() && self.publish_handle.as_ref().map_or(true, |h| h.is_empty()) {
            return Err(format!("A {} video must carry a publish handle", self.state));
        }

        Ok(())
    }
}

// =============================================================================
// User
// =============================================================================

/// A registered owner whose channels are discovered through their grant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub authorization_code: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn credentials(&self) -> SourceCredentials {
        SourceCredentials::new(&self.id, &self.access_token, &self.refresh_token)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("User id cannot be empty".to_string());
        }

        let email = self.email.trim();
        match email.find('@') {
            Some(at) if at > 0 && at + 1 < email.len() => Ok(()),
            _ => Err(format!("Invalid email address for user {}", self.id)),
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("authorization_code", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Timestamp mapping
// =============================================================================

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(field: &str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| LibraryError::InvalidInput {
        field: field.to_string(),
        message: format!("Timestamp out of range: {}", millis),
    })
}
