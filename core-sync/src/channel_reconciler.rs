//! # Channel Reconciler
//!
//! Refreshes a stored channel from the content source.
//!
//! The only status change made here is the revocation path: when the owner
//! has revoked the grant, the channel is opted out and ingestion stops. Any
//! other failure leaves the channel exactly as stored.

use crate::error::{with_timeout, SyncError};
use bridge_traits::source::{ChannelMetadata, ContentSource};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::models::{Channel, ParticipationStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Result of reconciling one channel. Callers persist the carried channel
/// unless it is `Unchanged`: `Updated` writes only the external metadata,
/// `Revoked` writes only the participation fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelReconciliation {
    /// External metadata was refreshed
    Updated(Channel),
    /// The owner revoked access; the channel is now opted out
    Revoked(Channel),
    /// The source could not be read; the stored channel with the reason
    Unchanged(Channel, String),
}

impl ChannelReconciliation {
    pub fn channel(&self) -> &Channel {
        match self {
            ChannelReconciliation::Updated(c)
            | ChannelReconciliation::Revoked(c)
            | ChannelReconciliation::Unchanged(c, _) => c,
        }
    }

    pub fn into_channel(self) -> Channel {
        match self {
            ChannelReconciliation::Updated(c)
            | ChannelReconciliation::Revoked(c)
            | ChannelReconciliation::Unchanged(c, _) => c,
        }
    }

    pub fn needs_persist(&self) -> bool {
        !matches!(self, ChannelReconciliation::Unchanged(..))
    }
}

/// Overwrite the externally sourced fields of `stored` with `metadata`.
///
/// External: title, description, custom url, country, published date,
/// thumbnails, statistics, uploads playlist.
/// Local and preserved: identity, owner, status, `should_sync`,
/// `last_acted_at`, tokens, linkage, category, `created_at`.
pub fn merge_channel_metadata(
    stored: &Channel,
    metadata: ChannelMetadata,
    now: DateTime<Utc>,
) -> Channel {
    Channel {
        title: metadata.title,
        description: metadata.description,
        custom_url: metadata.custom_url,
        country: metadata.country,
        published_at: metadata.published_at,
        thumbnails: metadata.thumbnails,
        statistics: metadata.statistics,
        uploads_playlist_id: metadata.uploads_playlist_id,
        updated_at: now,
        ..stored.clone()
    }
}

/// Opt the channel out after its owner revoked access.
pub fn revoke(stored: &Channel, now: DateTime<Utc>) -> Channel {
    Channel {
        participation_status: ParticipationStatus::OptedOut,
        should_sync: false,
        last_acted_at: Some(now),
        updated_at: now,
        ..stored.clone()
    }
}

pub struct ChannelReconciler {
    source: Arc<dyn ContentSource>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl ChannelReconciler {
    pub fn new(source: Arc<dyn ContentSource>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            source,
            clock,
            timeout,
        }
    }

    /// Refresh `stored` from the source. Never fails: every failure mode is
    /// an outcome.
    #[instrument(skip(self, stored), fields(channel_id = %stored.id))]
    pub async fn reconcile(&self, stored: &Channel) -> ChannelReconciliation {
        let credentials = stored.credentials();
        let fetched = with_timeout(
            self.timeout,
            "fetch_channels",
            self.source.fetch_channels(&credentials),
        )
        .await;

        match fetched {
            Ok(channels) => match channels.into_iter().find(|c| c.id == stored.id) {
                Some(metadata) => {
                    let merged = merge_channel_metadata(stored, metadata, self.clock.now());
                    debug!(
                        subscribers = ?merged.subscriber_count(),
                        "Channel metadata refreshed"
                    );
                    ChannelReconciliation::Updated(merged)
                }
                None => {
                    warn!("Channel not listed for its owner, keeping stored record");
                    ChannelReconciliation::Unchanged(
                        stored.clone(),
                        "channel not returned by source".to_string(),
                    )
                }
            },
            Err(SyncError::AuthRevoked(reason)) => {
                warn!(reason = %reason, "Owner revoked access, opting channel out");
                ChannelReconciliation::Revoked(revoke(stored, self.clock.now()))
            }
            Err(e) => {
                warn!(error = %e, "Channel fetch failed, keeping stored record");
                ChannelReconciliation::Unchanged(stored.clone(), e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::source::{
        ChannelRef, ChannelStatistics, SourceCredentials, SourceError, Thumbnails, VideoMetadata,
    };
    use bridge_traits::time::FixedClock;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn stored() -> Channel {
        Channel {
            id: "UC1".to_string(),
            user_id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            title: "Old title".to_string(),
            description: "Old".to_string(),
            custom_url: None,
            country: None,
            published_at: None,
            thumbnails: Thumbnails::default(),
            statistics: None,
            uploads_playlist_id: "UU1".to_string(),
            participation_status: ParticipationStatus::Verified,
            should_sync: true,
            last_acted_at: Some(at(2)),
            access_token: "ya29.a".to_string(),
            refresh_token: "1//r".to_string(),
            target_channel_id: Some(42),
            referrer_channel_id: None,
            video_category_id: Some("22".to_string()),
            created_at: at(1),
            updated_at: at(1),
        }
    }

    fn metadata(id: &str) -> ChannelMetadata {
        ChannelMetadata {
            id: id.to_string(),
            title: "New title".to_string(),
            description: "Fresh".to_string(),
            custom_url: Some("@fresh".to_string()),
            country: Some("DE".to_string()),
            published_at: Some(at(0)),
            thumbnails: Thumbnails::default(),
            statistics: Some(ChannelStatistics {
                subscriber_count: Some(5_000),
                ..ChannelStatistics::default()
            }),
            uploads_playlist_id: "UU1".to_string(),
        }
    }

    struct ScriptedSource {
        response: Mutex<Option<Result<Vec<ChannelMetadata>, SourceError>>>,
    }

    impl ScriptedSource {
        fn new(response: Result<Vec<ChannelMetadata>, SourceError>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
            })
        }
    }

    #[async_trait]
    impl ContentSource for ScriptedSource {
        async fn fetch_channel(
            &self,
            _credentials: &SourceCredentials,
        ) -> Result<ChannelMetadata, SourceError> {
            Err(SourceError::Transient("unused".to_string()))
        }

        async fn fetch_channels(
            &self,
            _credentials: &SourceCredentials,
        ) -> Result<Vec<ChannelMetadata>, SourceError> {
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(SourceError::Transient("exhausted".to_string())))
        }

        async fn fetch_recent_videos(
            &self,
            _channel: &ChannelRef,
            _limit: usize,
        ) -> Result<Vec<VideoMetadata>, SourceError> {
            Ok(Vec::new())
        }
    }

    struct HangingSource;

    #[async_trait]
    impl ContentSource for HangingSource {
        async fn fetch_channel(
            &self,
            _credentials: &SourceCredentials,
        ) -> Result<ChannelMetadata, SourceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(SourceError::Transient("late".to_string()))
        }

        async fn fetch_recent_videos(
            &self,
            _channel: &ChannelRef,
            _limit: usize,
        ) -> Result<Vec<VideoMetadata>, SourceError> {
            Ok(Vec::new())
        }
    }

    fn reconciler(source: Arc<dyn ContentSource>) -> ChannelReconciler {
        ChannelReconciler::new(source, Arc::new(FixedClock::new(at(12))), Duration::from_secs(5))
    }

    #[test]
    fn test_merge_keeps_local_fields() {
        let stored = stored();
        let merged = merge_channel_metadata(&stored, metadata("UC1"), at(12));

        assert_eq!(merged.title, "New title");
        assert_eq!(merged.subscriber_count(), Some(5_000));
        assert_eq!(merged.country.as_deref(), Some("DE"));
        assert_eq!(merged.participation_status, ParticipationStatus::Verified);
        assert!(merged.should_sync);
        assert_eq!(merged.last_acted_at, Some(at(2)));
        assert_eq!(merged.target_channel_id, Some(42));
        assert_eq!(merged.video_category_id.as_deref(), Some("22"));
        assert_eq!(merged.refresh_token, "1//r");
        assert_eq!(merged.created_at, at(1));
        assert_eq!(merged.updated_at, at(12));
    }

    #[tokio::test]
    async fn test_success_updates_metadata() {
        let outcome = reconciler(ScriptedSource::new(Ok(vec![metadata("UC1")])))
            .reconcile(&stored())
            .await;

        match outcome {
            ChannelReconciliation::Updated(channel) => assert_eq!(channel.title, "New title"),
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_revocation_opts_channel_out() {
        let outcome = reconciler(ScriptedSource::new(Err(SourceError::AuthRevoked(
            "invalid_grant".to_string(),
        ))))
        .reconcile(&stored())
        .await;

        assert!(outcome.needs_persist());
        match outcome {
            ChannelReconciliation::Revoked(channel) => {
                assert_eq!(channel.participation_status, ParticipationStatus::OptedOut);
                assert!(!channel.should_sync);
                assert_eq!(channel.last_acted_at, Some(at(12)));
                assert_eq!(channel.title, "Old title");
            }
            other => panic!("expected revocation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_channel_unchanged() {
        let stored = stored();
        let outcome = reconciler(ScriptedSource::new(Err(SourceError::Transient(
            "503".to_string(),
        ))))
        .reconcile(&stored)
        .await;

        assert!(!outcome.needs_persist());
        assert_eq!(outcome.into_channel(), stored);
    }

    #[tokio::test]
    async fn test_unlisted_channel_is_unchanged() {
        let outcome = reconciler(ScriptedSource::new(Ok(vec![metadata("UC-other")])))
            .reconcile(&stored())
            .await;
        assert!(matches!(outcome, ChannelReconciliation::Unchanged(..)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_unchanged() {
        let stored = stored();
        let outcome = reconciler(Arc::new(HangingSource)).reconcile(&stored).await;

        match outcome {
            ChannelReconciliation::Unchanged(channel, reason) => {
                assert_eq!(channel, stored);
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected unchanged, got {:?}", other),
        }
    }
}
