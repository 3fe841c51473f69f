//! # Sync Coordinator
//!
//! Entry point of the sync engine.
//!
//! ## Overview
//!
//! The `SyncCoordinator` owns the reconcilers, the publish state machine and
//! the command processor, and exposes every engine operation:
//! - Classify channels into ingestion cadences
//! - Run an ingestion cycle over the channels due in the active buckets
//! - Reconcile one channel's uploads on demand
//! - Publish and upload single videos
//! - Apply signed administrative commands
//! - Register users and discover their channels
//!
//! ## Ingestion Cycle
//!
//! 1. Read every ingestible channel (Unverified or Verified, `should_sync` set)
//! 2. Keep those whose frequency bucket is active
//! 3. For each, on a bounded worker pool:
//!    - Refresh channel metadata (or opt it out on revoked access) and persist
//!    - Merge recent uploads and persist them in one transaction
//!    - Announce videos that need a publish attempt
//!    - Optionally publish those videos inline on a second bounded pool
//! 4. Return the counts
//!
//! A failure in one channel, including a panic in its task, is logged and
//! counted; it never stops the other channels.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{FrequencyBucket, SyncConfig, SyncCoordinator};
//!
//! # async fn example(coordinator: SyncCoordinator) -> core_sync::Result<()> {
//! let report = coordinator
//!     .run_ingestion_cycle(&[FrequencyBucket::Daily, FrequencyBucket::Weekly])
//!     .await?;
//! println!("{} channels reconciled", report.channels_reconciled);
//! # Ok(())
//! # }
//! ```

use crate::{
    channel_reconciler::{merge_channel_metadata, ChannelReconciler, ChannelReconciliation},
    commands::{CommandProcessor, SignedCommand},
    emitter::{channel_snapshot, user_snapshot, EventEmitter},
    error::with_timeout,
    frequency::{classify, is_due, FrequencyBucket, FrequencyThresholds},
    publish::{PublishOutcome, PublishStateMachine},
    video_reconciler::{VideoReconciler, VideoReconciliation},
    Result, SyncError,
};
use bridge_traits::{
    publishing::PublishingBackend, signature::SignatureVerifier, source::ContentSource,
    time::Clock,
};
use core_library::models::{Channel, User, Video, VideoState};
use core_library::repositories::{ChannelRepository, UserRepository, VideoRepository};
use core_runtime::events::{EventTransport, LifecycleEvent, Topic, TopicNames};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Channels reconciled at the same time during a cycle
    pub max_concurrent_channels: usize,

    /// Videos published at the same time when publishing inline
    pub max_concurrent_videos: usize,

    /// Recent uploads fetched per channel
    pub max_videos_per_channel: usize,

    /// Limit applied to every source, store, backend and transport call
    pub external_call_timeout: Duration,

    /// Age after which an in-flight claim may be taken over
    pub publish_claim_ttl: Duration,

    pub frequency_thresholds: FrequencyThresholds,

    /// `should_sync` for channels seen for the first time
    pub new_channels_sync_by_default: bool,

    /// Publish needs-attention videos during the cycle instead of leaving
    /// them to event consumers
    pub publish_inline: bool,

    pub topics: TopicNames,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_channels: 8,
            max_concurrent_videos: 4,
            max_videos_per_channel: 50,
            external_call_timeout: Duration::from_secs(30),
            publish_claim_ttl: Duration::from_secs(30 * 60),
            frequency_thresholds: FrequencyThresholds::default(),
            new_channels_sync_by_default: true,
            publish_inline: false,
            topics: TopicNames::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_max_concurrent_channels(mut self, n: usize) -> Self {
        self.max_concurrent_channels = n;
        self
    }

    pub fn with_max_concurrent_videos(mut self, n: usize) -> Self {
        self.max_concurrent_videos = n;
        self
    }

    pub fn with_max_videos_per_channel(mut self, n: usize) -> Self {
        self.max_videos_per_channel = n;
        self
    }

    pub fn with_external_call_timeout(mut self, timeout: Duration) -> Self {
        self.external_call_timeout = timeout;
        self
    }

    pub fn with_publish_claim_ttl(mut self, ttl: Duration) -> Self {
        self.publish_claim_ttl = ttl;
        self
    }

    pub fn with_frequency_thresholds(mut self, thresholds: FrequencyThresholds) -> Self {
        self.frequency_thresholds = thresholds;
        self
    }

    pub fn with_new_channels_sync_by_default(mut self, enabled: bool) -> Self {
        self.new_channels_sync_by_default = enabled;
        self
    }

    pub fn with_publish_inline(mut self, enabled: bool) -> Self {
        self.publish_inline = enabled;
        self
    }

    pub fn with_topics(mut self, topics: TopicNames) -> Self {
        self.topics = topics;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_channels == 0 {
            return Err(SyncError::Validation(
                "max_concurrent_channels must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_videos == 0 {
            return Err(SyncError::Validation(
                "max_concurrent_videos must be at least 1".to_string(),
            ));
        }
        if self.max_videos_per_channel == 0 {
            return Err(SyncError::Validation(
                "max_videos_per_channel must be at least 1".to_string(),
            ));
        }
        if self.external_call_timeout.is_zero() {
            return Err(SyncError::Validation(
                "external_call_timeout must be positive".to_string(),
            ));
        }
        if self.publish_claim_ttl.is_zero() {
            return Err(SyncError::Validation(
                "publish_claim_ttl must be positive".to_string(),
            ));
        }
        self.frequency_thresholds.validate()?;
        self.topics
            .validate()
            .map_err(|e| SyncError::Validation(e.to_string()))?;
        Ok(())
    }
}

/// Collaborators the engine runs against.
#[derive(Clone)]
pub struct SyncDependencies {
    pub channels: Arc<dyn ChannelRepository>,
    pub videos: Arc<dyn VideoRepository>,
    pub users: Arc<dyn UserRepository>,
    pub source: Arc<dyn ContentSource>,
    pub backend: Arc<dyn PublishingBackend>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub transport: Arc<dyn EventTransport>,
    pub clock: Arc<dyn Clock>,
}

/// Counts from one ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Ingestible channels read from the store
    pub channels_considered: usize,
    /// Channels whose bucket was active
    pub channels_due: usize,
    pub channels_reconciled: usize,
    pub channels_revoked: usize,
    /// Channels the source could not be read for
    pub channels_unchanged: usize,
    /// Channels whose task failed or panicked
    pub channels_failed: usize,
    pub videos_fetched: usize,
    pub videos_new: usize,
    pub videos_published: usize,
    pub videos_publish_failed: usize,
}

enum ChannelRun {
    Reconciled {
        videos: VideoReconciliation,
        published: usize,
        publish_failed: usize,
    },
    Revoked,
    Unchanged,
}

/// Sync engine entry point
pub struct SyncCoordinator {
    config: SyncConfig,
    channels: Arc<dyn ChannelRepository>,
    videos: Arc<dyn VideoRepository>,
    users: Arc<dyn UserRepository>,
    source: Arc<dyn ContentSource>,
    clock: Arc<dyn Clock>,
    emitter: EventEmitter,
    channel_reconciler: Arc<ChannelReconciler>,
    video_reconciler: Arc<VideoReconciler>,
    publisher: Arc<PublishStateMachine>,
    commands: Arc<CommandProcessor>,
    video_permits: Arc<Semaphore>,
}

impl SyncCoordinator {
    /// Validate `config` and wire the engine components.
    pub fn new(config: SyncConfig, deps: SyncDependencies) -> Result<Self> {
        config.validate()?;

        let timeout = config.external_call_timeout;
        let emitter = EventEmitter::new(
            Arc::clone(&deps.transport),
            config.topics.clone(),
            Arc::clone(&deps.clock),
            timeout,
        );

        let channel_reconciler = Arc::new(ChannelReconciler::new(
            Arc::clone(&deps.source),
            Arc::clone(&deps.clock),
            timeout,
        ));
        let video_reconciler = Arc::new(VideoReconciler::new(
            Arc::clone(&deps.source),
            Arc::clone(&deps.videos),
            emitter.clone(),
            Arc::clone(&deps.clock),
            timeout,
            config.max_videos_per_channel,
        ));
        let publisher = Arc::new(PublishStateMachine::new(
            Arc::clone(&deps.channels),
            Arc::clone(&deps.videos),
            deps.backend,
            emitter.clone(),
            Arc::clone(&deps.clock),
            timeout,
            config.publish_claim_ttl,
        ));
        let commands = Arc::new(CommandProcessor::new(
            Arc::clone(&deps.channels),
            deps.verifier,
            emitter.clone(),
            Arc::clone(&deps.clock),
            timeout,
        ));

        Ok(Self {
            video_permits: Arc::new(Semaphore::new(config.max_concurrent_videos)),
            config,
            channels: deps.channels,
            videos: deps.videos,
            users: deps.users,
            source: deps.source,
            clock: deps.clock,
            emitter,
            channel_reconciler,
            video_reconciler,
            publisher,
            commands,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn classify(&self, channel: &Channel) -> FrequencyBucket {
        classify(channel.statistics.as_ref(), &self.config.frequency_thresholds)
    }

    /// Reconcile every ingestible channel whose bucket is in `active`.
    ///
    /// # Errors
    /// Only when the initial channel query fails. Per-channel failures are
    /// counted in the report.
    #[instrument(skip(self), fields(active = ?active))]
    pub async fn run_ingestion_cycle(&self, active: &[FrequencyBucket]) -> Result<CycleReport> {
        let candidates = with_timeout(
            self.config.external_call_timeout,
            "find_ingestible",
            self.channels.find_ingestible(),
        )
        .await?;

        let mut report = CycleReport {
            channels_considered: candidates.len(),
            ..CycleReport::default()
        };

        let due: Vec<Channel> = candidates
            .into_iter()
            .filter(|channel| is_due(self.classify(channel), active))
            .collect();
        report.channels_due = due.len();

        if due.is_empty() {
            info!(considered = report.channels_considered, "No channels due");
            return Ok(report);
        }

        info!(
            considered = report.channels_considered,
            due = report.channels_due,
            "Starting ingestion cycle"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_channels));
        let mut handles = Vec::with_capacity(due.len());

        for channel in due {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(channel_id = %channel.id, error = %e, "Channel worker pool closed");
                    report.channels_failed += 1;
                    continue;
                }
            };

            let worker = self.clone_for_task();
            let channel_id = channel.id.clone();
            let handle = tokio::spawn(async move {
                let result = worker.sync_channel(channel).await;
                drop(permit);
                result
            });
            handles.push((channel_id, handle));
        }

        for (channel_id, handle) in handles {
            match handle.await {
                Ok(Ok(ChannelRun::Reconciled {
                    videos,
                    published,
                    publish_failed,
                })) => {
                    report.channels_reconciled += 1;
                    report.videos_fetched += videos.fetched;
                    report.videos_new += videos.new;
                    report.videos_published += published;
                    report.videos_publish_failed += publish_failed;
                }
                Ok(Ok(ChannelRun::Revoked)) => report.channels_revoked += 1,
                Ok(Ok(ChannelRun::Unchanged)) => report.channels_unchanged += 1,
                Ok(Err(e)) => {
                    warn!(channel_id = %channel_id, error = %e, "Channel sync failed");
                    report.channels_failed += 1;
                }
                Err(e) => {
                    error!(channel_id = %channel_id, error = %e, "Task panicked");
                    report.channels_failed += 1;
                }
            }
        }

        info!(
            reconciled = report.channels_reconciled,
            revoked = report.channels_revoked,
            unchanged = report.channels_unchanged,
            failed = report.channels_failed,
            videos_new = report.videos_new,
            "Ingestion cycle complete"
        );

        Ok(report)
    }

    /// Merge one channel's recent uploads, as triggered by an `IngestChannel`
    /// event.
    ///
    /// # Errors
    /// `NotFound` for an unknown channel, `Validation` when the channel is
    /// not ingestible.
    #[instrument(skip(self), fields(channel_id = %channel_id))]
    pub async fn reconcile_channel_videos(&self, channel_id: &str) -> Result<VideoReconciliation> {
        let channel = self.load_channel(channel_id).await?;
        if !channel.is_ingestible() {
            return Err(SyncError::Validation(format!(
                "Channel {} is not ingestible ({}, should_sync = {})",
                channel.id, channel.participation_status, channel.should_sync
            )));
        }
        self.video_reconciler.reconcile(&channel).await
    }

    pub async fn publish_video(&self, channel_id: &str, video_id: &str) -> Result<PublishOutcome> {
        self.publisher.publish_video(channel_id, video_id).await
    }

    pub async fn upload_video(&self, channel_id: &str, video_id: &str) -> Result<PublishOutcome> {
        self.publisher.upload_video(channel_id, video_id).await
    }

    pub async fn apply_channel_command(
        &self,
        channel_id: &str,
        command: &SignedCommand,
    ) -> Result<Channel> {
        self.commands.apply(channel_id, command).await
    }

    /// Videos whose last publish attempt failed.
    pub async fn failed_videos(&self) -> Result<Vec<Video>> {
        with_timeout(
            self.config.external_call_timeout,
            "find_by_state",
            self.videos.find_by_state(VideoState::PublishFailed),
        )
        .await
    }

    /// Persist a user and announce the registration.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn register_user(&self, user: User) -> Result<User> {
        user.validate().map_err(SyncError::Validation)?;

        with_timeout(
            self.config.external_call_timeout,
            "upsert_user",
            self.users.upsert(&user),
        )
        .await?;

        info!("User registered");
        self.emitter
            .emit(Topic::UserEvents, LifecycleEvent::UserCreated(user_snapshot(&user)))
            .await;

        Ok(user)
    }

    /// Discover every channel the user manages and store it.
    ///
    /// Known channels get fresh metadata and the user's current tokens; new
    /// ones start `Unverified`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn ingest_user_channels(&self, user_id: &str) -> Result<Vec<Channel>> {
        let timeout = self.config.external_call_timeout;
        let user = with_timeout(timeout, "find_user", self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| SyncError::not_found("User", user_id))?;

        self.emitter
            .emit(
                Topic::UserEvents,
                LifecycleEvent::UserIngestionTriggered(user_snapshot(&user)),
            )
            .await;

        let discovered = with_timeout(
            timeout,
            "fetch_channels",
            self.source.fetch_channels(&user.credentials()),
        )
        .await?;

        let known: HashMap<String, Channel> =
            with_timeout(timeout, "find_by_user", self.channels.find_by_user(&user.id))
                .await?
                .into_iter()
                .map(|channel| (channel.id.clone(), channel))
                .collect();

        let now = self.clock.now();
        let mut channels = Vec::with_capacity(discovered.len());
        for metadata in discovered {
            let stored = match known.get(&metadata.id) {
                Some(channel) => Some(channel.clone()),
                None => with_timeout(timeout, "find_channel", self.channels.find_by_id(&metadata.id))
                    .await?,
            };

            let channel = match stored {
                Some(stored) => Channel {
                    user_id: user.id.clone(),
                    email: user.email.clone(),
                    access_token: user.access_token.clone(),
                    refresh_token: user.refresh_token.clone(),
                    ..merge_channel_metadata(&stored, metadata, now)
                },
                None => Channel::discovered(
                    metadata,
                    &user,
                    self.config.new_channels_sync_by_default,
                    now,
                ),
            };
            channels.push(channel);
        }

        with_timeout(timeout, "upsert_all", self.channels.upsert_all(&channels)).await?;

        info!(channels = channels.len(), "User channels discovered");
        let events = channels
            .iter()
            .map(|channel| LifecycleEvent::ChannelSpotted(channel_snapshot(channel)))
            .collect();
        self.emitter.emit_batch(Topic::ChannelEvents, events).await;

        Ok(channels)
    }

    /// Link a channel to its account in the publishing backend.
    ///
    /// # Errors
    /// `Validation` when the referrer is the channel's own linkage or the
    /// target is already linked to another channel.
    #[instrument(skip(self), fields(channel_id = %channel_id))]
    pub async fn record_channel_linkage(
        &self,
        channel_id: &str,
        target_channel_id: i64,
        referrer_channel_id: Option<i64>,
    ) -> Result<Channel> {
        if referrer_channel_id == Some(target_channel_id) {
            return Err(SyncError::Validation(
                "A channel cannot refer itself".to_string(),
            ));
        }

        let timeout = self.config.external_call_timeout;
        let mut channel = self.load_channel(channel_id).await?;

        let linked = with_timeout(
            timeout,
            "find_by_target_channel_id",
            self.channels.find_by_target_channel_id(target_channel_id),
        )
        .await?;
        if let Some(other) = linked.filter(|other| other.id != channel.id) {
            return Err(SyncError::Validation(format!(
                "Target channel {} is already linked to {}",
                target_channel_id, other.id
            )));
        }

        channel.target_channel_id = Some(target_channel_id);
        channel.referrer_channel_id = referrer_channel_id;
        channel.updated_at = self.clock.now();

        with_timeout(timeout, "upsert_channel", self.channels.upsert(&channel)).await?;
        info!("Channel linkage recorded");

        Ok(channel)
    }

    async fn load_channel(&self, channel_id: &str) -> Result<Channel> {
        with_timeout(
            self.config.external_call_timeout,
            "find_channel",
            self.channels.find_by_id(channel_id),
        )
        .await?
        .ok_or_else(|| SyncError::not_found("Channel", channel_id))
    }

    /// One channel's share of a cycle.
    async fn sync_channel(&self, channel: Channel) -> Result<ChannelRun> {
        let timeout = self.config.external_call_timeout;
        let reconciliation = self.channel_reconciler.reconcile(&channel).await;

        // Only the columns this cycle owns are written; a command or linkage
        // that landed during the fetch must survive.
        match &reconciliation {
            ChannelReconciliation::Updated(refreshed) => {
                with_timeout(
                    timeout,
                    "update_channel_metadata",
                    self.channels.update_external_metadata(refreshed),
                )
                .await?;
            }
            ChannelReconciliation::Revoked(revoked) => {
                with_timeout(
                    timeout,
                    "update_channel_participation",
                    self.channels.update_participation(revoked),
                )
                .await?;
            }
            ChannelReconciliation::Unchanged(..) => {}
        }

        match reconciliation {
            ChannelReconciliation::Unchanged(_, reason) => {
                debug!(channel_id = %channel.id, reason = %reason, "Channel left unchanged");
                Ok(ChannelRun::Unchanged)
            }
            ChannelReconciliation::Revoked(_) => Ok(ChannelRun::Revoked),
            ChannelReconciliation::Updated(_) => {
                // A command may have landed since the cycle read the channel.
                let current = self.load_channel(&channel.id).await?;
                if !current.is_ingestible() {
                    info!(
                        channel_id = %current.id,
                        status = %current.participation_status,
                        "Channel no longer ingestible, skipping uploads"
                    );
                    return Ok(ChannelRun::Unchanged);
                }

                self.emitter
                    .emit(
                        Topic::ChannelEvents,
                        LifecycleEvent::IngestChannel(channel_snapshot(&current)),
                    )
                    .await;

                let videos = self.video_reconciler.reconcile(&current).await?;
                let (published, publish_failed) = if self.config.publish_inline {
                    self.publish_pending(&current, &videos.needs_attention).await
                } else {
                    (0, 0)
                };

                Ok(ChannelRun::Reconciled {
                    videos,
                    published,
                    publish_failed,
                })
            }
        }
    }

    /// Publish `pending` on the shared video pool. Returns (succeeded, failed).
    async fn publish_pending(&self, channel: &Channel, pending: &[Video]) -> (usize, usize) {
        let mut handles = Vec::with_capacity(pending.len());

        for video in pending.iter().filter(|v| v.is_publishable()) {
            let permit = match Arc::clone(&self.video_permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(video_id = %video.id, error = %e, "Video worker pool closed");
                    break;
                }
            };

            let publisher = Arc::clone(&self.publisher);
            let channel_id = channel.id.clone();
            let video_id = video.id.clone();
            handles.push(tokio::spawn(async move {
                let result = publisher.publish_video(&channel_id, &video_id).await;
                drop(permit);
                (video_id, result)
            }));
        }

        let mut published = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok((_, Ok(PublishOutcome::Succeeded(_)))) => published += 1,
                Ok((_, Ok(PublishOutcome::Failed(_)))) => failed += 1,
                Ok((_, Ok(PublishOutcome::Skipped(_)))) => {}
                Ok((video_id, Err(e))) => {
                    warn!(video_id = %video_id, error = %e, "Inline publish failed");
                    failed += 1;
                }
                Err(e) => {
                    error!(channel_id = %channel.id, error = %e, "Task panicked");
                    failed += 1;
                }
            }
        }

        (published, failed)
    }

    /// Clone self for spawned tasks
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            channels: Arc::clone(&self.channels),
            videos: Arc::clone(&self.videos),
            users: Arc::clone(&self.users),
            source: Arc::clone(&self.source),
            clock: Arc::clone(&self.clock),
            emitter: self.emitter.clone(),
            channel_reconciler: Arc::clone(&self.channel_reconciler),
            video_reconciler: Arc::clone(&self.video_reconciler),
            publisher: Arc::clone(&self.publisher),
            commands: Arc::clone(&self.commands),
            video_permits: Arc::clone(&self.video_permits),
        }
    }
}
