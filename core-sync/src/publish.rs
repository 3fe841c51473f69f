//! # Publish State Machine
//!
//! Drives one video through record creation and media upload.
//!
//! ## Claiming
//!
//! Before calling the backend a worker claims the video by moving it to
//! `Publishing` (or `UploadStarted`) with a compare-and-swap on the stored
//! `(state, updated_at)` pair. Two workers reacting to the same event race on
//! that swap; the loser skips. A claim older than the configured TTL is
//! considered abandoned and may be taken over.
//!
//! ## Ordering
//!
//! Every outcome is persisted before its event is emitted.

use crate::emitter::EventEmitter;
use crate::error::{with_timeout, Result, SyncError};
use bridge_traits::publishing::{
    PublishRequest, PublishTarget, PublishingBackend, RecordHandle, UploadRequest,
};
use bridge_traits::source::{PrivacyStatus, ProcessingStatus};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::models::{Channel, Video, VideoState};
use core_library::repositories::{ChannelRepository, VideoRepository};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Why a publish or upload attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The source is still processing the upload
    NotReady,
    Private,
    AlreadyPublished,
    /// Another worker holds a fresh claim
    ClaimInFlight,
    /// Another worker won the claim race
    AlreadyClaimed,
    /// The channel is suspended or opted out
    ChannelInactive,
    /// Upload requested before the record exists
    NotPublished,
    AlreadyUploaded,
    MissingHandle,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotReady => "not_ready",
            SkipReason::Private => "private",
            SkipReason::AlreadyPublished => "already_published",
            SkipReason::ClaimInFlight => "claim_in_flight",
            SkipReason::AlreadyClaimed => "already_claimed",
            SkipReason::ChannelInactive => "channel_inactive",
            SkipReason::NotPublished => "not_published",
            SkipReason::AlreadyUploaded => "already_uploaded",
            SkipReason::MissingHandle => "missing_handle",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Skipped(SkipReason),
    Succeeded(RecordHandle),
    /// The backend call failed or timed out; the failure state is persisted
    Failed(String),
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PublishOutcome::Succeeded(_))
    }
}

pub struct PublishStateMachine {
    channels: Arc<dyn ChannelRepository>,
    videos: Arc<dyn VideoRepository>,
    backend: Arc<dyn PublishingBackend>,
    emitter: EventEmitter,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    claim_ttl: chrono::Duration,
}

impl PublishStateMachine {
    pub fn new(
        channels: Arc<dyn ChannelRepository>,
        videos: Arc<dyn VideoRepository>,
        backend: Arc<dyn PublishingBackend>,
        emitter: EventEmitter,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            channels,
            videos,
            backend,
            emitter,
            clock,
            timeout,
            claim_ttl: chrono::Duration::from_std(claim_ttl)
                .unwrap_or_else(|_| chrono::Duration::MAX),
        }
    }

    /// Create the backend record for one video.
    ///
    /// # Errors
    /// `NotFound` when the channel or video is absent. Backend failures are
    /// reported as [`PublishOutcome::Failed`], never as errors.
    #[instrument(skip(self), fields(channel_id = %channel_id, video_id = %video_id))]
    pub async fn publish_video(&self, channel_id: &str, video_id: &str) -> Result<PublishOutcome> {
        let (channel, video) = self.load(channel_id, video_id).await?;
        let now = self.clock.now();

        if let Some(reason) = self.publish_guard(&channel, &video, now) {
            info!(reason = %reason, state = %video.state, "Publish skipped");
            return Ok(PublishOutcome::Skipped(reason));
        }

        let Some(claimed) = self.claim(&video, VideoState::Publishing, now).await? else {
            return Ok(PublishOutcome::Skipped(SkipReason::AlreadyClaimed));
        };

        let target = publish_target(&channel);
        let request = publish_request(&claimed);
        let created = with_timeout(
            self.timeout,
            "create_record",
            self.backend.create_record(&target, &request),
        )
        .await;

        let mut next = claimed.clone();
        let outcome = match created {
            Ok(handle) if !handle.is_empty() => {
                next.publish_handle = Some(handle.clone());
                next.transition(VideoState::PublishSucceeded, self.clock.now())?;
                PublishOutcome::Succeeded(handle)
            }
            Ok(_) => {
                next.transition(VideoState::PublishFailed, self.clock.now())?;
                PublishOutcome::Failed("backend returned an empty record handle".to_string())
            }
            Err(e) => {
                next.transition(VideoState::PublishFailed, self.clock.now())?;
                PublishOutcome::Failed(e.to_string())
            }
        };

        if !self.record_outcome(&claimed, &next).await? {
            return Ok(PublishOutcome::Skipped(SkipReason::AlreadyClaimed));
        }

        match &outcome {
            PublishOutcome::Succeeded(handle) => {
                info!(handle = %handle, "Video published")
            }
            PublishOutcome::Failed(reason) => warn!(reason = %reason, "Video publish failed"),
            PublishOutcome::Skipped(_) => {}
        }
        self.emitter.emit_video(&next).await;

        Ok(outcome)
    }

    /// Upload the media for a video whose record exists.
    #[instrument(skip(self), fields(channel_id = %channel_id, video_id = %video_id))]
    pub async fn upload_video(&self, channel_id: &str, video_id: &str) -> Result<PublishOutcome> {
        let (channel, video) = self.load(channel_id, video_id).await?;
        let now = self.clock.now();

        if let Some(reason) = self.upload_guard(&channel, &video, now) {
            info!(reason = %reason, state = %video.state, "Upload skipped");
            return Ok(PublishOutcome::Skipped(reason));
        }

        let Some(handle) = video.publish_handle.clone() else {
            return Ok(PublishOutcome::Skipped(SkipReason::MissingHandle));
        };

        let Some(claimed) = self.claim(&video, VideoState::UploadStarted, now).await? else {
            return Ok(PublishOutcome::Skipped(SkipReason::AlreadyClaimed));
        };
        self.emitter.emit_video(&claimed).await;

        let target = publish_target(&channel);
        let request = UploadRequest {
            video_id: claimed.id.clone(),
            source_url: claimed.url.clone(),
            handle: handle.clone(),
        };
        let uploaded = with_timeout(
            self.timeout,
            "upload_media",
            self.backend.upload_media(&target, &request),
        )
        .await;

        let mut next = claimed.clone();
        let outcome = match uploaded {
            Ok(()) => {
                next.transition(VideoState::UploadSucceeded, self.clock.now())?;
                PublishOutcome::Succeeded(handle)
            }
            Err(e) => {
                next.transition(VideoState::UploadFailed, self.clock.now())?;
                PublishOutcome::Failed(e.to_string())
            }
        };

        if !self.record_outcome(&claimed, &next).await? {
            return Ok(PublishOutcome::Skipped(SkipReason::AlreadyClaimed));
        }

        match &outcome {
            PublishOutcome::Failed(reason) => warn!(reason = %reason, "Media upload failed"),
            _ => info!("Media uploaded"),
        }
        self.emitter.emit_video(&next).await;

        Ok(outcome)
    }

    async fn load(&self, channel_id: &str, video_id: &str) -> Result<(Channel, Video)> {
        let channel = with_timeout(
            self.timeout,
            "find_channel",
            self.channels.find_by_id(channel_id),
        )
        .await?
        .ok_or_else(|| SyncError::not_found("Channel", channel_id))?;

        let video = with_timeout(self.timeout, "find_video", self.videos.find_by_id(video_id))
            .await?
            .filter(|video| video.channel_id == channel.id)
            .ok_or_else(|| SyncError::not_found("Video", video_id))?;

        Ok((channel, video))
    }

    fn publish_guard(&self, channel: &Channel, video: &Video, now: DateTime<Utc>) -> Option<SkipReason> {
        if channel.participation_status.blocks_sync() {
            return Some(SkipReason::ChannelInactive);
        }
        if video.state.is_published() {
            return Some(SkipReason::AlreadyPublished);
        }
        if video.processing_status != ProcessingStatus::Ready {
            return Some(SkipReason::NotReady);
        }
        if video.privacy_status == PrivacyStatus::Private {
            return Some(SkipReason::Private);
        }
        if video.state == VideoState::Publishing && !self.is_stale(video, now) {
            return Some(SkipReason::ClaimInFlight);
        }
        None
    }

    fn upload_guard(&self, channel: &Channel, video: &Video, now: DateTime<Utc>) -> Option<SkipReason> {
        if channel.participation_status.blocks_sync() {
            return Some(SkipReason::ChannelInactive);
        }
        match video.state {
            VideoState::UploadSucceeded => Some(SkipReason::AlreadyUploaded),
            VideoState::UploadStarted if !self.is_stale(video, now) => {
                Some(SkipReason::ClaimInFlight)
            }
            state if !state.is_published() => Some(SkipReason::NotPublished),
            _ => None,
        }
    }

    fn is_stale(&self, video: &Video, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(video.updated_at) >= self.claim_ttl
    }

    /// Swap `video` into the in-flight state. `None` when another worker
    /// changed the row first.
    async fn claim(&self, video: &Video, to: VideoState, now: DateTime<Utc>) -> Result<Option<Video>> {
        let mut claimed = video.clone();
        claimed.transition(to, now)?;

        let won = with_timeout(
            self.timeout,
            "claim_video",
            self.videos.compare_and_swap_state(video, &claimed),
        )
        .await?;

        if won {
            Ok(Some(claimed))
        } else {
            info!(state = %to, "Claim lost to another worker");
            Ok(None)
        }
    }

    /// Persist the outcome over our own claim. `false` when the claim was
    /// taken over while the backend call was running.
    async fn record_outcome(&self, claimed: &Video, next: &Video) -> Result<bool> {
        let recorded = with_timeout(
            self.timeout,
            "record_outcome",
            self.videos.compare_and_swap_state(claimed, next),
        )
        .await?;

        if !recorded {
            warn!(
                state = %next.state,
                handle = ?next.publish_handle,
                "Claim was taken over before the outcome was recorded"
            );
        }
        Ok(recorded)
    }
}

fn publish_target(channel: &Channel) -> PublishTarget {
    PublishTarget {
        channel_id: channel.id.clone(),
        target_channel_id: channel.target_channel_id,
        video_category_id: channel.video_category_id.clone(),
    }
}

fn publish_request(video: &Video) -> PublishRequest {
    PublishRequest {
        video_id: video.id.clone(),
        title: video.title.clone(),
        description: video.description.clone(),
        duration: video.duration.clone(),
        thumbnails: video.thumbnails.clone(),
        published_at: video.published_at,
        source_url: video.url.clone(),
    }
}
