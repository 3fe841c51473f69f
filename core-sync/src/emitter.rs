//! Lifecycle event emission
//!
//! Every emit happens after the state it describes has been persisted. A
//! transport failure is logged and swallowed: the store stays the source of
//! truth and the next cycle re-announces anything still owed.

use crate::error::duration_millis;
use bridge_traits::time::Clock;
use core_library::models::{Channel, User, Video, VideoState};
use core_runtime::events::{
    ChannelSnapshot, EventEnvelope, EventTransport, LifecycleEvent, Topic, TopicNames,
    UserSnapshot, VideoSnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct EventEmitter {
    transport: Arc<dyn EventTransport>,
    topics: TopicNames,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl EventEmitter {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        topics: TopicNames,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            topics,
            clock,
            timeout,
        }
    }

    pub fn topics(&self) -> &TopicNames {
        &self.topics
    }

    /// Publish one event. Returns whether the transport accepted it.
    pub async fn emit(&self, topic: Topic, event: LifecycleEvent) -> bool {
        let name = self.topics.name_of(topic);
        let envelope = EventEnvelope::new(event, self.clock.now());

        match tokio::time::timeout(self.timeout, self.transport.publish(name, &envelope)).await {
            Ok(Ok(())) => {
                debug!(
                    topic = name,
                    subject = envelope.event.subject(),
                    subject_id = envelope.event.subject_id(),
                    "Event published"
                );
                true
            }
            Ok(Err(e)) => {
                warn!(
                    topic = name,
                    subject = envelope.event.subject(),
                    subject_id = envelope.event.subject_id(),
                    error = %e,
                    "Failed to publish event"
                );
                false
            }
            Err(_) => {
                warn!(
                    topic = name,
                    subject = envelope.event.subject(),
                    timeout_ms = duration_millis(self.timeout),
                    "Event publish timed out"
                );
                false
            }
        }
    }

    /// Publish a batch to one topic in a single transport call.
    ///
    /// Returns the number of events handed to the transport, zero on failure.
    pub async fn emit_batch(&self, topic: Topic, events: Vec<LifecycleEvent>) -> usize {
        if events.is_empty() {
            return 0;
        }

        let name = self.topics.name_of(topic);
        let now = self.clock.now();
        let envelopes: Vec<EventEnvelope> = events
            .into_iter()
            .map(|event| EventEnvelope::new(event, now))
            .collect();

        match tokio::time::timeout(self.timeout, self.transport.publish_all(name, &envelopes))
            .await
        {
            Ok(Ok(())) => {
                debug!(topic = name, count = envelopes.len(), "Event batch published");
                envelopes.len()
            }
            Ok(Err(e)) => {
                warn!(
                    topic = name,
                    count = envelopes.len(),
                    error = %e,
                    "Failed to publish event batch"
                );
                0
            }
            Err(_) => {
                warn!(
                    topic = name,
                    count = envelopes.len(),
                    timeout_ms = duration_millis(self.timeout),
                    "Event batch publish timed out"
                );
                0
            }
        }
    }

    /// Announce a video's current state, if that state has an event.
    pub async fn emit_video(&self, video: &Video) -> bool {
        match video_event(video) {
            Some(event) => self.emit(video_topic(video.state), event).await,
            None => false,
        }
    }
}

pub fn channel_snapshot(channel: &Channel) -> ChannelSnapshot {
    ChannelSnapshot {
        channel_id: channel.id.clone(),
        user_id: channel.user_id.clone(),
        title: channel.title.clone(),
        participation_status: channel.participation_status.as_str().to_string(),
        should_sync: channel.should_sync,
        subscriber_count: channel.subscriber_count(),
        target_channel_id: channel.target_channel_id,
    }
}

pub fn video_snapshot(video: &Video) -> VideoSnapshot {
    VideoSnapshot {
        video_id: video.id.clone(),
        channel_id: video.channel_id.clone(),
        title: video.title.clone(),
        state: video.state.as_str().to_string(),
        publish_handle: video.publish_handle.as_ref().map(|h| h.as_str().to_string()),
    }
}

pub fn user_snapshot(user: &User) -> UserSnapshot {
    UserSnapshot {
        user_id: user.id.clone(),
        email: user.email.clone(),
    }
}

/// The event announcing `video`'s state. `Publishing` is a claim and is
/// never announced.
pub fn video_event(video: &Video) -> Option<LifecycleEvent> {
    let snapshot = video_snapshot(video);
    match video.state {
        VideoState::New => Some(LifecycleEvent::VideoObserved(snapshot)),
        VideoState::PublishFailed => Some(LifecycleEvent::VideoPublishFailed(snapshot)),
        VideoState::Publishing => None,
        VideoState::PublishSucceeded => Some(LifecycleEvent::VideoPublished(snapshot)),
        VideoState::UploadStarted => Some(LifecycleEvent::VideoUploadStarted(snapshot)),
        VideoState::UploadFailed => Some(LifecycleEvent::VideoUploadFailed(snapshot)),
        VideoState::UploadSucceeded => Some(LifecycleEvent::VideoUploadSucceeded(snapshot)),
    }
}

/// Videos still owed a publish go to the create topic, everything past the
/// record creation to the upload topic.
pub fn video_topic(state: VideoState) -> Topic {
    if state.needs_attention() {
        Topic::CreateVideoEvents
    } else {
        Topic::UploadVideoEvents
    }
}
