//! # Lifecycle Events
//!
//! Typed lifecycle events, the transport contract they are published through,
//! and an in-process transport built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one tagged enum, [`LifecycleEvent`], discriminated by
//!   `subject` and carrying a typed snapshot `payload`
//! - **Envelope**: [`EventEnvelope`] stamps each event with an id, a dedupe
//!   key and a timestamp
//! - **Transport**: [`EventTransport`] publishes envelopes to named topics
//! - **EventBus**: broadcast-backed transport for single-process deployments
//!   and tests
//!
//! ## Wire shape
//!
//! ```json
//! {
//!   "id": "4f3c...",
//!   "dedupe_key": "9a1b...",
//!   "timestamp": "2024-03-01T12:00:00Z",
//!   "event": {
//!     "subject": "VideoObserved",
//!     "payload": { "video_id": "v1", "channel_id": "UC1", "title": "...", "state": "New" }
//!   }
//! }
//! ```
//!
//! ## Delivery
//!
//! Transports are at-least-once. Consumers that need idempotence key on
//! `dedupe_key`, which is stable for the same subject, entity and state.
//!
//! ## Subscribing
//!
//! ```rust
//! use core_runtime::events::{EventBus, EventStream};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut stream = EventStream::new(bus.subscribe()).topic("createVideoEvents");
//!
//! tokio::spawn(async move {
//!     while let Ok(published) = stream.recv().await {
//!         println!("{}: {}", published.topic, published.envelope.event.subject());
//!     }
//! });
//! # }
//! ```

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the broadcast channel.
///
/// Subscribers that fall further behind than this receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Topics
// ============================================================================

/// Logical topics events are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Channel discovery and ingestion requests
    ChannelEvents,
    /// Videos that need a publish attempt
    CreateVideoEvents,
    /// Videos whose record exists and whose media upload progressed
    UploadVideoEvents,
    /// User registration
    UserEvents,
}

/// Concrete topic names per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNames {
    pub channel_events: String,
    pub create_video_events: String,
    pub upload_video_events: String,
    pub user_events: String,
}

impl TopicNames {
    pub fn name_of(&self, topic: Topic) -> &str {
        match topic {
            Topic::ChannelEvents => &self.channel_events,
            Topic::CreateVideoEvents => &self.create_video_events,
            Topic::UploadVideoEvents => &self.upload_video_events,
            Topic::UserEvents => &self.user_events,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let names = [
            &self.channel_events,
            &self.create_video_events,
            &self.upload_video_events,
            &self.user_events,
        ];
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(Error::Config("Topic names cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            channel_events: "channelEvents".to_string(),
            create_video_events: "createVideoEvents".to_string(),
            upload_video_events: "uploadVideoEvents".to_string(),
            user_events: "userEvents".to_string(),
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Channel state at the time of the event. Credentials are never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: String,
    pub user_id: String,
    pub title: String,
    pub participation_status: String,
    pub should_sync: bool,
    pub subscriber_count: Option<u64>,
    pub target_channel_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSnapshot {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub state: String,
    pub publish_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: String,
    pub email: String,
}

// ============================================================================
// Lifecycle Events
// ============================================================================

/// Every state transition the engine announces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subject", content = "payload")]
pub enum LifecycleEvent {
    /// A channel was discovered for a registered user
    ChannelSpotted(ChannelSnapshot),
    /// A channel was reconciled and its uploads should be ingested
    IngestChannel(ChannelSnapshot),
    UserCreated(UserSnapshot),
    UserIngestionTriggered(UserSnapshot),
    /// A video is stored in `New` and awaits a publish attempt
    VideoObserved(VideoSnapshot),
    VideoPublishFailed(VideoSnapshot),
    VideoPublished(VideoSnapshot),
    VideoUploadStarted(VideoSnapshot),
    VideoUploadSucceeded(VideoSnapshot),
    VideoUploadFailed(VideoSnapshot),
}

impl LifecycleEvent {
    /// The `subject` discriminant as serialized.
    pub fn subject(&self) -> &'static str {
        match self {
            LifecycleEvent::ChannelSpotted(_) => "ChannelSpotted",
            LifecycleEvent::IngestChannel(_) => "IngestChannel",
            LifecycleEvent::UserCreated(_) => "UserCreated",
            LifecycleEvent::UserIngestionTriggered(_) => "UserIngestionTriggered",
            LifecycleEvent::VideoObserved(_) => "VideoObserved",
            LifecycleEvent::VideoPublishFailed(_) => "VideoPublishFailed",
            LifecycleEvent::VideoPublished(_) => "VideoPublished",
            LifecycleEvent::VideoUploadStarted(_) => "VideoUploadStarted",
            LifecycleEvent::VideoUploadSucceeded(_) => "VideoUploadSucceeded",
            LifecycleEvent::VideoUploadFailed(_) => "VideoUploadFailed",
        }
    }

    /// Identifier of the entity the event is about.
    pub fn subject_id(&self) -> &str {
        match self {
            LifecycleEvent::ChannelSpotted(c) | LifecycleEvent::IngestChannel(c) => &c.channel_id,
            LifecycleEvent::UserCreated(u) | LifecycleEvent::UserIngestionTriggered(u) => {
                &u.user_id
            }
            LifecycleEvent::VideoObserved(v)
            | LifecycleEvent::VideoPublishFailed(v)
            | LifecycleEvent::VideoPublished(v)
            | LifecycleEvent::VideoUploadStarted(v)
            | LifecycleEvent::VideoUploadSucceeded(v)
            | LifecycleEvent::VideoUploadFailed(v) => &v.video_id,
        }
    }

    pub fn video(&self) -> Option<&VideoSnapshot> {
        match self {
            LifecycleEvent::VideoObserved(v)
            | LifecycleEvent::VideoPublishFailed(v)
            | LifecycleEvent::VideoPublished(v)
            | LifecycleEvent::VideoUploadStarted(v)
            | LifecycleEvent::VideoUploadSucceeded(v)
            | LifecycleEvent::VideoUploadFailed(v) => Some(v),
            _ => None,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            LifecycleEvent::ChannelSpotted(_) => "Channel discovered",
            LifecycleEvent::IngestChannel(_) => "Channel ingestion requested",
            LifecycleEvent::UserCreated(_) => "User registered",
            LifecycleEvent::UserIngestionTriggered(_) => "User channel discovery requested",
            LifecycleEvent::VideoObserved(_) => "Video observed",
            LifecycleEvent::VideoPublishFailed(_) => "Video publish failed",
            LifecycleEvent::VideoPublished(_) => "Video published",
            LifecycleEvent::VideoUploadStarted(_) => "Video upload started",
            LifecycleEvent::VideoUploadSucceeded(_) => "Video upload succeeded",
            LifecycleEvent::VideoUploadFailed(_) => "Video upload failed",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            LifecycleEvent::VideoPublishFailed(_) | LifecycleEvent::VideoUploadFailed(_) => {
                EventSeverity::Warning
            }
            LifecycleEvent::VideoPublished(_)
            | LifecycleEvent::VideoUploadSucceeded(_)
            | LifecycleEvent::UserCreated(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Stable key for the (subject, entity, state) triple.
    pub fn dedupe_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.subject().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.subject_id().as_bytes());
        if let Some(video) = self.video() {
            hasher.update([0u8]);
            hasher.update(video.channel_id.as_bytes());
            hasher.update([0u8]);
            hasher.update(video.state.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Write-once record handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub dedupe_key: String,
    pub timestamp: DateTime<Utc>,
    pub event: LifecycleEvent,
}

impl EventEnvelope {
    pub fn new(event: LifecycleEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dedupe_key: event.dedupe_key(),
            timestamp,
            event,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Internal(format!("Failed to encode event: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Internal(format!("Failed to decode event: {}", e)))
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Publishes envelopes to named topics.
///
/// Fire-and-forget from the engine's point of view: a failure is logged by
/// the caller and never retried synchronously.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<()>;

    /// Publish a batch in one call. The default publishes one at a time and
    /// stops at the first failure.
    async fn publish_all(&self, topic: &str, envelopes: &[EventEnvelope]) -> Result<()> {
        for envelope in envelopes {
            self.publish(topic, envelope).await?;
        }
        Ok(())
    }
}

/// An envelope together with the topic it was published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub topic: String,
    pub envelope: EventEnvelope,
}

// ============================================================================
// Event Bus
// ============================================================================

/// In-process broadcast transport.
///
/// Publishing with no subscribers is not an error: the event is dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send directly on the channel. Fails when nobody is subscribed.
    pub fn emit(&self, event: PublishedEvent) -> std::result::Result<usize, SendError<PublishedEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[async_trait]
impl EventTransport for EventBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<()> {
        let published = PublishedEvent {
            topic: topic.to_string(),
            envelope: envelope.clone(),
        };
        if self.emit(published).is_err() {
            debug!(
                topic = topic,
                subject = envelope.event.subject(),
                "No subscribers, event dropped"
            );
        }
        Ok(())
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&PublishedEvent) -> bool + Send + Sync>;

/// Receiver wrapper with an optional predicate.
pub struct EventStream {
    receiver: Receiver<PublishedEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<PublishedEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PublishedEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only deliver events published to `topic`.
    pub fn topic(self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        self.filter(move |event| event.topic == topic)
    }

    fn matches(&self, event: &PublishedEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    pub async fn recv(&mut self) -> std::result::Result<PublishedEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<std::result::Result<PublishedEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<PublishedEvent> {
        let mut events = Vec::new();
        while let Some(Ok(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
