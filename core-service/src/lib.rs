//! Core service façade and bootstrap helpers.
//!
//! This crate wires a [`CoreConfig`] into a running sync engine: it opens the
//! SQLite pool (running the embedded migration), builds the repositories and
//! hands everything to a [`SyncCoordinator`]. Servers typically enable the
//! `native-shims` feature, which supplies the YouTube source over `reqwest`
//! when none is injected.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_library::db::{create_pool, DatabaseConfig};
use core_library::repositories::{
    SqliteChannelRepository, SqliteUserRepository, SqliteVideoRepository,
};
use core_library::models::{Channel, User, Video};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventStream;
use core_sync::{
    CycleReport, FrequencyBucket, PublishOutcome, SignedCommand, SyncConfig, SyncCoordinator,
    SyncDependencies, VideoReconciliation,
};
use sqlx::SqlitePool;
use tracing::info;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct SyncService {
    coordinator: Arc<SyncCoordinator>,
    config: CoreConfig,
    pool: SqlitePool,
}

impl SyncService {
    /// Open the store and build the engine.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Library`] when the database cannot be opened or migrated
    /// - [`CoreError::Sync`] when `sync_config` is invalid
    pub async fn new(config: CoreConfig, sync_config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let pool = create_pool(DatabaseConfig::from_url(config.database_url.clone())).await?;
        Self::with_pool(config, sync_config, pool)
    }

    /// Build the engine over an already opened (and migrated) pool.
    pub fn with_pool(config: CoreConfig, sync_config: SyncConfig, pool: SqlitePool) -> Result<Self> {
        let deps = SyncDependencies {
            channels: Arc::new(SqliteChannelRepository::new(pool.clone())),
            videos: Arc::new(SqliteVideoRepository::new(pool.clone())),
            users: Arc::new(SqliteUserRepository::new(pool.clone())),
            source: config.content_source.clone(),
            backend: config.publishing_backend.clone(),
            verifier: config.signature_verifier.clone(),
            transport: config.event_transport.clone(),
            clock: config.clock.clone(),
        };

        let coordinator = SyncCoordinator::new(sync_config, deps)?;
        info!(database_url = %config.database_url, "Sync service ready");

        Ok(Self {
            coordinator: Arc::new(coordinator),
            config,
            pool,
        })
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Subscribe to the in-process event bus. `None` when an external
    /// transport was injected.
    pub fn subscribe(&self) -> Option<EventStream> {
        self.config
            .event_bus
            .as_ref()
            .map(|bus| EventStream::new(bus.subscribe()))
    }

    pub async fn run_ingestion_cycle(&self, active: &[FrequencyBucket]) -> Result<CycleReport> {
        Ok(self.coordinator.run_ingestion_cycle(active).await?)
    }

    pub async fn register_user(&self, user: User) -> Result<User> {
        Ok(self.coordinator.register_user(user).await?)
    }

    pub async fn ingest_user_channels(&self, user_id: &str) -> Result<Vec<Channel>> {
        Ok(self.coordinator.ingest_user_channels(user_id).await?)
    }

    pub async fn reconcile_channel_videos(&self, channel_id: &str) -> Result<VideoReconciliation> {
        Ok(self.coordinator.reconcile_channel_videos(channel_id).await?)
    }

    pub async fn record_channel_linkage(
        &self,
        channel_id: &str,
        target_channel_id: i64,
        referrer_channel_id: Option<i64>,
    ) -> Result<Channel> {
        Ok(self
            .coordinator
            .record_channel_linkage(channel_id, target_channel_id, referrer_channel_id)
            .await?)
    }

    pub async fn publish_video(&self, channel_id: &str, video_id: &str) -> Result<PublishOutcome> {
        Ok(self.coordinator.publish_video(channel_id, video_id).await?)
    }

    pub async fn upload_video(&self, channel_id: &str, video_id: &str) -> Result<PublishOutcome> {
        Ok(self.coordinator.upload_video(channel_id, video_id).await?)
    }

    pub async fn apply_channel_command(
        &self,
        channel_id: &str,
        command: &SignedCommand,
    ) -> Result<Channel> {
        Ok(self.coordinator.apply_channel_command(channel_id, command).await?)
    }

    pub async fn failed_videos(&self) -> Result<Vec<Video>> {
        Ok(self.coordinator.failed_videos().await?)
    }

    /// Close the pool. In-flight operations finish first.
    pub async fn shutdown(&self) {
        self.pool.close().await;
        info!("Sync service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::publishing::{
        PublishError, PublishRequest, PublishTarget, PublishingBackend, RecordHandle,
        UploadRequest,
    };
    use bridge_traits::signature::SignatureVerifier;
    use bridge_traits::source::{
        ChannelMetadata, ChannelRef, ContentSource, SourceCredentials, SourceError, Thumbnails,
        VideoMetadata,
    };
    use bridge_traits::time::FixedClock;
    use chrono::{TimeZone, Utc};

    struct OneChannelSource;

    #[async_trait]
    impl ContentSource for OneChannelSource {
        async fn fetch_channel(
            &self,
            credentials: &SourceCredentials,
        ) -> std::result::Result<ChannelMetadata, SourceError> {
            Ok(ChannelMetadata {
                id: format!("UC-{}", credentials.owner_id),
                title: "Channel".to_string(),
                description: String::new(),
                custom_url: None,
                country: None,
                published_at: None,
                thumbnails: Thumbnails::default(),
                statistics: None,
                uploads_playlist_id: format!("UU-{}", credentials.owner_id),
            })
        }

        async fn fetch_recent_videos(
            &self,
            _channel: &ChannelRef,
            _limit: usize,
        ) -> std::result::Result<Vec<VideoMetadata>, SourceError> {
            Ok(vec![])
        }
    }

    struct AcceptingBackend;

    #[async_trait]
    impl PublishingBackend for AcceptingBackend {
        async fn create_record(
            &self,
            _target: &PublishTarget,
            request: &PublishRequest,
        ) -> std::result::Result<RecordHandle, PublishError> {
            Ok(RecordHandle::new(format!("rec-{}", request.video_id)))
        }

        async fn upload_media(
            &self,
            _target: &PublishTarget,
            _request: &UploadRequest,
        ) -> std::result::Result<(), PublishError> {
            Ok(())
        }
    }

    struct RejectingVerifier;

    #[async_trait]
    impl SignatureVerifier for RejectingVerifier {
        async fn verify_owner(
            &self,
            _channel_id: &str,
            _message: &[u8],
            _signature: &str,
        ) -> BridgeResult<bool> {
            Ok(false)
        }

        async fn verify_operator(&self, _message: &[u8], _signature: &str) -> BridgeResult<bool> {
            Ok(false)
        }
    }

    fn core_config() -> CoreConfig {
        CoreConfig::builder()
            .database_url("sqlite::memory:")
            .content_source(Arc::new(OneChannelSource))
            .publishing_backend(Arc::new(AcceptingBackend))
            .signature_verifier(Arc::new(RejectingVerifier))
            .clock(Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            )))
            .build()
            .unwrap()
    }

    fn user() -> User {
        User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            access_token: "ya29.u1".to_string(),
            refresh_token: "1//u1".to_string(),
            authorization_code: "code".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_service_boots_on_in_memory_store() {
        let service = SyncService::new(core_config(), SyncConfig::default())
            .await
            .unwrap();

        let report = service
            .run_ingestion_cycle(&[FrequencyBucket::Daily])
            .await
            .unwrap();
        assert_eq!(report, CycleReport::default());
        assert!(service.failed_videos().await.unwrap().is_empty());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_onboarding_flows_through_service() {
        let service = SyncService::new(core_config(), SyncConfig::default())
            .await
            .unwrap();
        let mut events = service.subscribe().unwrap();

        service.register_user(user()).await.unwrap();
        let channels = service.ingest_user_channels("u1").await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].id, "UC-u1");

        let subjects: Vec<&str> = events
            .drain()
            .iter()
            .map(|e| e.envelope.event.subject())
            .collect();
        assert_eq!(
            subjects,
            vec!["UserCreated", "UserIngestionTriggered", "ChannelSpotted"]
        );
    }

    #[tokio::test]
    async fn test_linkage_and_video_reconcile_through_service() {
        let service = SyncService::new(core_config(), SyncConfig::default())
            .await
            .unwrap();
        service.register_user(user()).await.unwrap();
        service.ingest_user_channels("u1").await.unwrap();

        let linked = service
            .record_channel_linkage("UC-u1", 42, None)
            .await
            .unwrap();
        assert_eq!(linked.target_channel_id, Some(42));

        service.reconcile_channel_videos("UC-u1").await.unwrap();
        assert!(matches!(
            service.reconcile_channel_videos("UC-missing").await,
            Err(CoreError::Sync(core_sync::SyncError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_sync_config_is_rejected() {
        let result = SyncService::new(
            core_config(),
            SyncConfig::default().with_max_concurrent_channels(0),
        )
        .await;
        assert!(matches!(result, Err(CoreError::Sync(_))));
    }

    #[tokio::test]
    async fn test_injected_transport_has_no_local_subscription() {
        let bus = core_runtime::events::EventBus::new(16);
        let config = CoreConfig::builder()
            .database_url("sqlite::memory:")
            .content_source(Arc::new(OneChannelSource))
            .publishing_backend(Arc::new(AcceptingBackend))
            .signature_verifier(Arc::new(RejectingVerifier))
            .event_transport(Arc::new(bus))
            .build()
            .unwrap();

        let service = SyncService::new(config, SyncConfig::default()).await.unwrap();
        assert!(service.subscribe().is_none());
    }
}
