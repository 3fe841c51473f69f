//! Shared fakes and fixtures for the engine integration tests.
//!
//! The store is a real in-memory SQLite database; the source, the
//! publishing backend and the signature verifier are scripted in memory.
//! Events are captured from an `EventBus` subscription, and the transport
//! records what the store held for each video at the moment it was told.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult,
    publishing::{PublishError, PublishRequest, PublishTarget, PublishingBackend, RecordHandle, UploadRequest},
    signature::SignatureVerifier,
    source::{
        ChannelMetadata, ChannelRef, ChannelStatistics, ContentSource, PrivacyStatus,
        ProcessingStatus, SourceCredentials, SourceError, Thumbnails, VideoMetadata,
    },
    time::FixedClock,
};
use chrono::{DateTime, TimeZone, Utc};
use core_library::db::create_test_pool;
use core_library::models::{Channel, User, Video, VideoState};
use core_library::repositories::{
    ChannelRepository, SqliteChannelRepository, SqliteUserRepository, SqliteVideoRepository,
    UserRepository, VideoRepository,
};
use core_runtime::error::Result as RuntimeResult;
use core_runtime::events::{EventBus, EventEnvelope, EventStream, EventTransport, PublishedEvent};
use core_sync::{SyncConfig, SyncCoordinator, SyncDependencies};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fixtures
// ============================================================================

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        access_token: format!("ya29.{}", id),
        refresh_token: format!("1//{}", id),
        authorization_code: "4/code".to_string(),
        created_at: at(1),
    }
}

pub fn channel_metadata(id: &str, subscribers: Option<u64>) -> ChannelMetadata {
    ChannelMetadata {
        id: id.to_string(),
        title: format!("Channel {}", id),
        description: "Creator channel".to_string(),
        custom_url: Some(format!("@{}", id.to_lowercase())),
        country: Some("US".to_string()),
        published_at: Some(at(0)),
        thumbnails: Thumbnails::default(),
        statistics: Some(ChannelStatistics {
            view_count: Some(1_000_000),
            comment_count: None,
            subscriber_count: subscribers,
            video_count: Some(12),
        }),
        uploads_playlist_id: format!("UU{}", id),
    }
}

pub fn video_metadata(id: &str, channel_id: &str) -> VideoMetadata {
    VideoMetadata {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        url: format!("https://www.youtube.com/watch?v={}", id),
        title: format!("Upload {}", id),
        description: "Watch this".to_string(),
        playlist_id: format!("UU{}", channel_id),
        resource_id: id.to_string(),
        thumbnails: Thumbnails::default(),
        duration: "PT3M20S".to_string(),
        published_at: Some(at(6)),
        processing_status: ProcessingStatus::Ready,
        privacy_status: PrivacyStatus::Public,
    }
}

// ============================================================================
// Fake content source
// ============================================================================

#[derive(Default)]
pub struct FakeSource {
    channels: Mutex<HashMap<String, Vec<ChannelMetadata>>>,
    videos: Mutex<HashMap<String, Vec<VideoMetadata>>>,
    owner_failures: Mutex<HashMap<String, SourceError>>,
    video_failures: Mutex<HashMap<String, SourceError>>,
    panic_on: Mutex<Option<String>>,
    /// Written to the store while `fetch_channels` runs, simulating a
    /// command landing mid-cycle.
    concurrent_edit: Mutex<Option<(Arc<SqliteChannelRepository>, Channel)>>,
}

impl FakeSource {
    /// Channels returned for `owner_id`.
    pub fn set_channels(&self, owner_id: &str, channels: Vec<ChannelMetadata>) {
        self.channels
            .lock()
            .unwrap()
            .insert(owner_id.to_string(), channels);
    }

    pub fn set_videos(&self, channel_id: &str, videos: Vec<VideoMetadata>) {
        self.videos
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), videos);
    }

    pub fn fail_owner(&self, owner_id: &str, error: SourceError) {
        self.owner_failures
            .lock()
            .unwrap()
            .insert(owner_id.to_string(), error);
    }

    pub fn fail_videos(&self, channel_id: &str, error: SourceError) {
        self.video_failures
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), error);
    }

    pub fn panic_on_videos(&self, channel_id: &str) {
        *self.panic_on.lock().unwrap() = Some(channel_id.to_string());
    }

    pub fn edit_during_fetch(&self, channels: Arc<SqliteChannelRepository>, channel: Channel) {
        *self.concurrent_edit.lock().unwrap() = Some((channels, channel));
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_channel(
        &self,
        credentials: &SourceCredentials,
    ) -> Result<ChannelMetadata, SourceError> {
        self.fetch_channels(credentials)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Malformed("no channel".to_string()))
    }

    async fn fetch_channels(
        &self,
        credentials: &SourceCredentials,
    ) -> Result<Vec<ChannelMetadata>, SourceError> {
        let edit = self.concurrent_edit.lock().unwrap().take();
        if let Some((channels, channel)) = edit {
            channels.upsert(&channel).await.unwrap();
        }
        if let Some(error) = self.owner_failures.lock().unwrap().get(&credentials.owner_id) {
            return Err(error.clone());
        }
        Ok(self
            .channels
            .lock()
            .unwrap()
            .get(&credentials.owner_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_recent_videos(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<VideoMetadata>, SourceError> {
        let should_panic = self.panic_on.lock().unwrap().as_deref() == Some(channel.channel_id.as_str());
        if should_panic {
            panic!("source exploded for {}", channel.channel_id);
        }
        if let Some(error) = self.video_failures.lock().unwrap().get(&channel.channel_id) {
            return Err(error.clone());
        }
        Ok(self
            .videos
            .lock()
            .unwrap()
            .get(&channel.channel_id)
            .map(|videos| videos.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

// ============================================================================
// Fake publishing backend
// ============================================================================

/// Scripted backend. Unscripted calls succeed with `rec-<video_id>`.
#[derive(Default)]
pub struct FakeBackend {
    create_results: Mutex<VecDeque<Result<RecordHandle, PublishError>>>,
    upload_results: Mutex<VecDeque<Result<(), PublishError>>>,
    pub created: Mutex<Vec<(PublishTarget, PublishRequest)>>,
    pub uploaded: Mutex<Vec<UploadRequest>>,
    /// Written to the store while `create_record` runs, simulating another
    /// worker taking over the claim.
    takeover: Mutex<Option<(Arc<SqliteVideoRepository>, Video)>>,
}

impl FakeBackend {
    pub fn push_create(&self, result: Result<RecordHandle, PublishError>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    pub fn push_upload(&self, result: Result<(), PublishError>) {
        self.upload_results.lock().unwrap().push_back(result);
    }

    pub fn take_over_with(&self, videos: Arc<SqliteVideoRepository>, video: Video) {
        *self.takeover.lock().unwrap() = Some((videos, video));
    }

    pub fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn upload_calls(&self) -> usize {
        self.uploaded.lock().unwrap().len()
    }
}

#[async_trait]
impl PublishingBackend for FakeBackend {
    async fn create_record(
        &self,
        target: &PublishTarget,
        request: &PublishRequest,
    ) -> Result<RecordHandle, PublishError> {
        self.created
            .lock()
            .unwrap()
            .push((target.clone(), request.clone()));

        let takeover = self.takeover.lock().unwrap().take();
        if let Some((videos, video)) = takeover {
            videos.upsert(&video).await.unwrap();
        }

        let scripted = self.create_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(RecordHandle::new(format!("rec-{}", request.video_id))))
    }

    async fn upload_media(
        &self,
        _target: &PublishTarget,
        request: &UploadRequest,
    ) -> Result<(), PublishError> {
        self.uploaded.lock().unwrap().push(request.clone());
        let scripted = self.upload_results.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(()))
    }
}

// ============================================================================
// Fake signature verifier
// ============================================================================

/// Accepts the signature `owner-ok` for owners and `operator-ok` for
/// operators; `reject_all` flips both to false.
#[derive(Default)]
pub struct FakeVerifier {
    reject_all: AtomicBool,
    pub messages: Mutex<Vec<Vec<u8>>>,
}

impl FakeVerifier {
    pub fn reject_all(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignatureVerifier for FakeVerifier {
    async fn verify_owner(
        &self,
        _channel_id: &str,
        message: &[u8],
        signature: &str,
    ) -> BridgeResult<bool> {
        self.messages.lock().unwrap().push(message.to_vec());
        Ok(!self.reject_all.load(Ordering::SeqCst) && signature == "owner-ok")
    }

    async fn verify_operator(&self, message: &[u8], signature: &str) -> BridgeResult<bool> {
        self.messages.lock().unwrap().push(message.to_vec());
        Ok(!self.reject_all.load(Ordering::SeqCst) && signature == "operator-ok")
    }
}

// ============================================================================
// Observing transport
// ============================================================================

/// What the store held for a video when its event reached the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreObservation {
    pub subject: &'static str,
    pub video_id: String,
    /// `None` when the row did not exist yet
    pub stored_state: Option<VideoState>,
}

/// Forwards to an `EventBus` after reading each announced video back from
/// the store.
pub struct ObservingTransport {
    bus: EventBus,
    videos: Arc<SqliteVideoRepository>,
    seen: Mutex<Vec<StoreObservation>>,
}

impl ObservingTransport {
    pub fn new(bus: EventBus, videos: Arc<SqliteVideoRepository>) -> Self {
        Self {
            bus,
            videos,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn observations(&self) -> Vec<StoreObservation> {
        self.seen.lock().unwrap().clone()
    }

    /// Stored state seen when `subject` was published for `video_id`.
    pub fn state_at_publish(&self, subject: &str, video_id: &str) -> Option<VideoState> {
        self.observations()
            .into_iter()
            .find(|o| o.subject == subject && o.video_id == video_id)
            .and_then(|o| o.stored_state)
    }
}

#[async_trait]
impl EventTransport for ObservingTransport {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> RuntimeResult<()> {
        let subject = envelope.event.subject();
        if subject.starts_with("Video") {
            let video_id = envelope.event.subject_id().to_string();
            let stored_state = self
                .videos
                .find_by_id(&video_id)
                .await
                .unwrap()
                .map(|v| v.state);
            self.seen.lock().unwrap().push(StoreObservation {
                subject,
                video_id,
                stored_state,
            });
        }
        self.bus.publish(topic, envelope).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub channels: Arc<SqliteChannelRepository>,
    pub videos: Arc<SqliteVideoRepository>,
    pub users: Arc<SqliteUserRepository>,
    pub source: Arc<FakeSource>,
    pub backend: Arc<FakeBackend>,
    pub verifier: Arc<FakeVerifier>,
    pub clock: Arc<FixedClock>,
    pub bus: EventBus,
    pub transport: Arc<ObservingTransport>,
    pub events: EventStream,
    pub coordinator: SyncCoordinator,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(SyncConfig::default()).await
    }

    pub async fn with_config(config: SyncConfig) -> Self {
        let pool = create_test_pool().await.unwrap();
        let channels = Arc::new(SqliteChannelRepository::new(pool.clone()));
        let videos = Arc::new(SqliteVideoRepository::new(pool.clone()));
        let users = Arc::new(SqliteUserRepository::new(pool));
        let source = Arc::new(FakeSource::default());
        let backend = Arc::new(FakeBackend::default());
        let verifier = Arc::new(FakeVerifier::default());
        let clock = Arc::new(FixedClock::new(at(12)));
        let bus = EventBus::new(256);
        let events = EventStream::new(bus.subscribe());
        let transport = Arc::new(ObservingTransport::new(bus.clone(), videos.clone()));

        let coordinator = SyncCoordinator::new(
            config,
            SyncDependencies {
                channels: channels.clone(),
                videos: videos.clone(),
                users: users.clone(),
                source: source.clone(),
                backend: backend.clone(),
                verifier: verifier.clone(),
                transport: transport.clone(),
                clock: clock.clone(),
            },
        )
        .unwrap();

        Self {
            channels,
            videos,
            users,
            source,
            backend,
            verifier,
            clock,
            bus,
            transport,
            events,
            coordinator,
        }
    }

    /// Store `owner` and one channel of theirs, returning the channel.
    pub async fn seed_channel(&self, owner: &User, channel_id: &str, subscribers: Option<u64>) -> Channel {
        self.users.upsert(owner).await.unwrap();
        let channel = Channel::discovered(channel_metadata(channel_id, subscribers), owner, true, at(2));
        self.channels.upsert(&channel).await.unwrap();
        self.source
            .set_channels(&owner.id, vec![channel_metadata(channel_id, subscribers)]);
        channel
    }

    pub async fn stored_channel(&self, id: &str) -> Channel {
        self.channels.find_by_id(id).await.unwrap().unwrap()
    }

    pub async fn stored_video(&self, id: &str) -> Video {
        self.videos.find_by_id(id).await.unwrap().unwrap()
    }

    /// Everything published since the last drain.
    pub fn drain_events(&mut self) -> Vec<PublishedEvent> {
        self.events.drain()
    }
}

pub fn on_topic<'a>(events: &'a [PublishedEvent], topic: &str) -> Vec<&'a PublishedEvent> {
    events.iter().filter(|e| e.topic == topic).collect()
}
