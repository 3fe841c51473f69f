//! # Video Reconciler
//!
//! Merges a channel's recent uploads into the store, then announces the
//! videos that still need a publish attempt.

use crate::emitter::{video_event, EventEmitter};
use crate::error::{with_timeout, Result};
use bridge_traits::source::{ContentSource, VideoMetadata};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::models::{Channel, Video};
use core_library::repositories::VideoRepository;
use core_runtime::events::Topic;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Counts and follow-up work from one channel's video reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoReconciliation {
    pub channel_id: String,
    pub fetched: usize,
    pub stored: usize,
    pub new: usize,
    pub events_emitted: usize,
    /// Videos in `New` or `PublishFailed` after the merge
    pub needs_attention: Vec<Video>,
}

/// Build the record to persist for `metadata`.
///
/// A known video keeps its state, handle, `created_at` and `updated_at`;
/// every descriptive field is replaced. An unknown video starts in `New`.
pub fn merge_video(stored: Option<&Video>, metadata: VideoMetadata, now: DateTime<Utc>) -> Video {
    match stored {
        Some(existing) => Video {
            id: existing.id.clone(),
            channel_id: existing.channel_id.clone(),
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
            state: existing.state,
            publish_handle: existing.publish_handle.clone(),
            created_at: existing.created_at,
            updated_at: existing.updated_at,
        },
        None => Video::observed(metadata, now),
    }
}

pub struct VideoReconciler {
    source: Arc<dyn ContentSource>,
    videos: Arc<dyn VideoRepository>,
    emitter: EventEmitter,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    max_videos: usize,
}

impl VideoReconciler {
    pub fn new(
        source: Arc<dyn ContentSource>,
        videos: Arc<dyn VideoRepository>,
        emitter: EventEmitter,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        max_videos: usize,
    ) -> Self {
        Self {
            source,
            videos,
            emitter,
            clock,
            timeout,
            max_videos,
        }
    }

    /// Fetch, merge and persist the channel's recent uploads.
    ///
    /// The merged set is written in one `upsert_all` before any event is
    /// published, so a consumer reacting to an event always finds the row.
    #[instrument(skip(self, channel), fields(channel_id = %channel.id))]
    pub async fn reconcile(&self, channel: &Channel) -> Result<VideoReconciliation> {
        let fetched = with_timeout(
            self.timeout,
            "fetch_recent_videos",
            self.source
                .fetch_recent_videos(&channel.channel_ref(), self.max_videos),
        )
        .await?;

        let total = fetched.len();
        let fetched: Vec<VideoMetadata> = fetched
            .into_iter()
            .filter(|metadata| {
                let belongs = metadata.channel_id == channel.id;
                if !belongs {
                    warn!(
                        video_id = %metadata.id,
                        reported_channel = %metadata.channel_id,
                        "Dropping video reported under another channel"
                    );
                }
                belongs
            })
            .collect();

        let existing: HashMap<String, Video> = with_timeout(
            self.timeout,
            "find_by_channel",
            self.videos.find_by_channel(&channel.id),
        )
        .await?
        .into_iter()
        .map(|video| (video.id.clone(), video))
        .collect();

        let now = self.clock.now();
        let mut new = 0;
        let mut merged: Vec<Video> = Vec::with_capacity(fetched.len());
        for metadata in fetched {
            if let Some(stored) = existing.get(&metadata.id) {
                merged.push(merge_video(Some(stored), metadata, now));
                continue;
            }

            // Not under this channel; the id may still be stored under another.
            let elsewhere = with_timeout(
                self.timeout,
                "find_video",
                self.videos.find_by_id(&metadata.id),
            )
            .await?;
            match elsewhere {
                Some(other) if other.channel_id != channel.id => {
                    warn!(
                        video_id = %metadata.id,
                        stored_channel = %other.channel_id,
                        "Video already stored under another channel, skipping"
                    );
                }
                stored => {
                    if stored.is_none() {
                        new += 1;
                    }
                    merged.push(merge_video(stored.as_ref(), metadata, now));
                }
            }
        }

        with_timeout(self.timeout, "upsert_all", self.videos.upsert_all(&merged)).await?;

        let needs_attention: Vec<Video> = merged
            .iter()
            .filter(|video| video.state.needs_attention())
            .cloned()
            .collect();

        let events = needs_attention.iter().filter_map(video_event).collect();
        let events_emitted = self
            .emitter
            .emit_batch(Topic::CreateVideoEvents, events)
            .await;

        if new > 0 {
            info!(
                fetched = total,
                stored = merged.len(),
                new,
                needs_attention = needs_attention.len(),
                "Videos reconciled"
            );
        } else {
            debug!(
                fetched = total,
                stored = merged.len(),
                needs_attention = needs_attention.len(),
                "Videos reconciled, nothing new"
            );
        }

        Ok(VideoReconciliation {
            channel_id: channel.id.clone(),
            fetched: total,
            stored: merged.len(),
            new,
            events_emitted,
            needs_attention,
        })
    }
}
