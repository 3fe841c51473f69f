//! Channel repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{from_millis, to_millis, Channel, ParticipationStatus};
use crate::repositories::{decode_thumbnails, encode_thumbnails};
use async_trait::async_trait;
use bridge_traits::source::ChannelStatistics;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{FromRow, Sqlite, SqlitePool};
use tracing::debug;

/// Channel repository interface
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Channel>>;

    /// Channels owned by a user, oldest first.
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Channel>>;

    /// Channel linked to a record in the publishing backend.
    async fn find_by_target_channel_id(&self, target_channel_id: i64) -> Result<Option<Channel>>;

    async fn find_by_status(&self, status: ParticipationStatus) -> Result<Vec<Channel>>;

    /// Channels that are Unverified or Verified with `should_sync` set.
    async fn find_ingestible(&self) -> Result<Vec<Channel>>;

    /// Insert or replace the full record.
    ///
    /// `created_at` is never overwritten. The administrative fields
    /// (status, `should_sync`, `last_acted_at`) are only taken from `channel`
    /// when its `last_acted_at` is not older than the stored one.
    ///
    /// # Errors
    /// Returns `InvalidInput` when the record fails validation.
    async fn upsert(&self, channel: &Channel) -> Result<()>;

    /// Upsert every record in one transaction.
    async fn upsert_all(&self, channels: &[Channel]) -> Result<()>;

    /// Write only the columns refreshed from the content source.
    ///
    /// Owner, status, tokens, linkage and category stay as stored. Returns
    /// `false` when the channel is not stored.
    async fn update_external_metadata(&self, channel: &Channel) -> Result<bool>;

    /// Write status, `should_sync` and `last_acted_at` only, unless the stored
    /// `last_acted_at` is newer. Returns `false` when nothing was written.
    async fn update_participation(&self, channel: &Channel) -> Result<bool>;
}

/// SQLite implementation of ChannelRepository
pub struct SqliteChannelRepository {
    pool: SqlitePool,
}

impl SqliteChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_CHANNEL: &str = r#"
    SELECT id, user_id, email, title, description, custom_url, country, published_at,
           thumbnails, view_count, comment_count, subscriber_count, video_count,
           has_statistics, uploads_playlist_id, participation_status, should_sync,
           last_acted_at, access_token, refresh_token, target_channel_id,
           referrer_channel_id, video_category_id, created_at, updated_at
    FROM channels
"#;

const UPSERT_CHANNEL: &str = r#"
    INSERT INTO channels (
        id, user_id, email, title, description, custom_url, country, published_at,
        thumbnails, view_count, comment_count, subscriber_count, video_count,
        has_statistics, uploads_playlist_id, participation_status, should_sync,
        last_acted_at, access_token, refresh_token, target_channel_id,
        referrer_channel_id, video_category_id, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        user_id = excluded.user_id,
        email = excluded.email,
        title = excluded.title,
        description = excluded.description,
        custom_url = excluded.custom_url,
        country = excluded.country,
        published_at = excluded.published_at,
        thumbnails = excluded.thumbnails,
        view_count = excluded.view_count,
        comment_count = excluded.comment_count,
        subscriber_count = excluded.subscriber_count,
        video_count = excluded.video_count,
        has_statistics = excluded.has_statistics,
        uploads_playlist_id = excluded.uploads_playlist_id,
        participation_status = CASE
            WHEN COALESCE(excluded.last_acted_at, -1) >= COALESCE(channels.last_acted_at, -1)
            THEN excluded.participation_status ELSE channels.participation_status END,
        should_sync = CASE
            WHEN COALESCE(excluded.last_acted_at, -1) >= COALESCE(channels.last_acted_at, -1)
            THEN excluded.should_sync ELSE channels.should_sync END,
        last_acted_at = CASE
            WHEN COALESCE(excluded.last_acted_at, -1) >= COALESCE(channels.last_acted_at, -1)
            THEN excluded.last_acted_at ELSE channels.last_acted_at END,
        access_token = excluded.access_token,
        refresh_token = excluded.refresh_token,
        target_channel_id = excluded.target_channel_id,
        referrer_channel_id = excluded.referrer_channel_id,
        video_category_id = excluded.video_category_id,
        updated_at = excluded.updated_at
"#;

const UPDATE_EXTERNAL_METADATA: &str = r#"
    UPDATE channels SET
        title = ?, description = ?, custom_url = ?, country = ?, published_at = ?,
        thumbnails = ?, view_count = ?, comment_count = ?, subscriber_count = ?,
        video_count = ?, has_statistics = ?, uploads_playlist_id = ?, updated_at = ?
    WHERE id = ?
"#;

const UPDATE_PARTICIPATION: &str = r#"
    UPDATE channels SET
        participation_status = ?, should_sync = ?, last_acted_at = ?, updated_at = ?
    WHERE id = ? AND COALESCE(?, -1) >= COALESCE(last_acted_at, -1)
"#;

/// Database row representation of a channel
#[derive(Debug, FromRow)]
struct ChannelRow {
    id: String,
    user_id: String,
    email: String,
    title: String,
    description: String,
    custom_url: Option<String>,
    country: Option<String>,
    published_at: Option<i64>,
    thumbnails: String,
    view_count: Option<i64>,
    comment_count: Option<i64>,
    subscriber_count: Option<i64>,
    video_count: Option<i64>,
    has_statistics: bool,
    uploads_playlist_id: String,
    participation_status: String,
    should_sync: bool,
    last_acted_at: Option<i64>,
    access_token: String,
    refresh_token: String,
    target_channel_id: Option<i64>,
    referrer_channel_id: Option<i64>,
    video_category_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn count_from_db(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

fn count_to_db(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

impl TryFrom<ChannelRow> for Channel {
    type Error = LibraryError;

    fn try_from(row: ChannelRow) -> Result<Self> {
        let statistics = row.has_statistics.then(|| ChannelStatistics {
            view_count: count_from_db(row.view_count),
            comment_count: count_from_db(row.comment_count),
            subscriber_count: count_from_db(row.subscriber_count),
            video_count: count_from_db(row.video_count),
        });

        Ok(Channel {
            id: row.id,
            user_id: row.user_id,
            email: row.email,
            title: row.title,
            description: row.description,
            custom_url: row.custom_url,
            country: row.country,
            published_at: row
                .published_at
                .map(|ms| from_millis("published_at", ms))
                .transpose()?,
            thumbnails: decode_thumbnails(&row.thumbnails)?,
            statistics,
            uploads_playlist_id: row.uploads_playlist_id,
            participation_status: row.participation_status.parse()?,
            should_sync: row.should_sync,
            last_acted_at: row
                .last_acted_at
                .map(|ms| from_millis("last_acted_at", ms))
                .transpose()?,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            target_channel_id: row.target_channel_id,
            referrer_channel_id: row.referrer_channel_id,
            video_category_id: row.video_category_id,
            created_at: from_millis("created_at", row.created_at)?,
            updated_at: from_millis("updated_at", row.updated_at)?,
        })
    }
}

fn upsert_query(channel: &Channel) -> Result<Query<'_, Sqlite, SqliteArguments<'_>>> {
    channel.validate()
        .map_err(|msg| LibraryError::invalid_input("channel", msg))?;

    let thumbnails = encode_thumbnails(&channel.thumbnails)?;
    let stats = channel.statistics.unwrap_or_default();

    Ok(sqlx::query(UPSERT_CHANNEL)
        .bind(&channel.id)
        .bind(&channel.user_id)
        .bind(&channel.email)
        .bind(&channel.title)
        .bind(&channel.description)
        .bind(&channel.custom_url)
        .bind(&channel.country)
        .bind(channel.published_at.map(to_millis))
        .bind(thumbnails)
        .bind(count_to_db(stats.view_count))
        .bind(count_to_db(stats.comment_count))
        .bind(count_to_db(stats.subscriber_count))
        .bind(count_to_db(stats.video_count))
        .bind(channel.statistics.is_some())
        .bind(&channel.uploads_playlist_id)
        .bind(channel.participation_status.as_str())
        .bind(channel.should_sync)
        .bind(channel.last_acted_at.map(to_millis))
        .bind(&channel.access_token)
        .bind(&channel.refresh_token)
        .bind(channel.target_channel_id)
        .bind(channel.referrer_channel_id)
        .bind(&channel.video_category_id)
        .bind(to_millis(channel.created_at))
        .bind(to_millis(channel.updated_at)))
}

impl SqliteChannelRepository {
    async fn fetch_many(&self, sql: String, bind: Option<String>) -> Result<Vec<Channel>> {
        let mut query = sqlx::query_as::<_, ChannelRow>(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Channel::try_from).collect()
    }
}

#[async_trait]
impl ChannelRepository for SqliteChannelRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Channel>> {
        let sql = format!("{} WHERE id = ?", SELECT_CHANNEL);
        let row = sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Channel::try_from).transpose()
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Channel>> {
        let sql = format!("{} WHERE user_id = ? ORDER BY created_at, id", SELECT_CHANNEL);
        self.fetch_many(sql, Some(user_id.to_string())).await
    }

    async fn find_by_target_channel_id(&self, target_channel_id: i64) -> Result<Option<Channel>> {
        let sql = format!("{} WHERE target_channel_id = ? LIMIT 1", SELECT_CHANNEL);
        let row = sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(target_channel_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Channel::try_from).transpose()
    }

    async fn find_by_status(&self, status: ParticipationStatus) -> Result<Vec<Channel>> {
        let sql = format!(
            "{} WHERE participation_status = ? ORDER BY created_at, id",
            SELECT_CHANNEL
        );
        self.fetch_many(sql, Some(status.as_str().to_string())).await
    }

    async fn find_ingestible(&self) -> Result<Vec<Channel>> {
        let sql = format!(
            "{} WHERE should_sync = 1 AND participation_status IN ('Unverified', 'Verified') \
             ORDER BY created_at, id",
            SELECT_CHANNEL
        );
        self.fetch_many(sql, None).await
    }

    async fn upsert(&self, channel: &Channel) -> Result<()> {
        upsert_query(channel)?.execute(&self.pool).await?;
        debug!(channel_id = %channel.id, "Channel upserted");
        Ok(())
    }

    async fn upsert_all(&self, channels: &[Channel]) -> Result<()> {
        if channels.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for channel in channels {
            upsert_query(channel)?.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(count = channels.len(), "Channels upserted");
        Ok(())
    }

    async fn update_external_metadata(&self, channel: &Channel) -> Result<bool> {
        let thumbnails = encode_thumbnails(&channel.thumbnails)?;
        let stats = channel.statistics.unwrap_or_default();

        let result = sqlx::query(UPDATE_EXTERNAL_METADATA)
            .bind(&channel.title)
            .bind(&channel.description)
            .bind(&channel.custom_url)
            .bind(&channel.country)
            .bind(channel.published_at.map(to_millis))
            .bind(thumbnails)
            .bind(count_to_db(stats.view_count))
            .bind(count_to_db(stats.comment_count))
            .bind(count_to_db(stats.subscriber_count))
            .bind(count_to_db(stats.video_count))
            .bind(channel.statistics.is_some())
            .bind(&channel.uploads_playlist_id)
            .bind(to_millis(channel.updated_at))
            .bind(&channel.id)
            .execute(&self.pool)
            .await?;

        debug!(channel_id = %channel.id, "Channel metadata updated");
        Ok(result.rows_affected() > 0)
    }

    async fn update_participation(&self, channel: &Channel) -> Result<bool> {
        channel.validate()
            .map_err(|msg| LibraryError::invalid_input("channel", msg))?;

        let last_acted_at = channel.last_acted_at.map(to_millis);
        let result = sqlx::query(UPDATE_PARTICIPATION)
            .bind(channel.participation_status.as_str())
            .bind(channel.should_sync)
            .bind(last_acted_at)
            .bind(to_millis(channel.updated_at))
            .bind(&channel.id)
            .bind(last_acted_at)
            .execute(&self.pool)
            .await?;

        let written = result.rows_affected() > 0;
        debug!(channel_id = %channel.id, written, "Channel participation updated");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::fixtures::{at, channel};

    async fn repo() -> SqliteChannelRepository {
        SqliteChannelRepository::new(create_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_upsert_and_find_roundtrip() {
        let repo = repo().await;
        let stored = channel("UC1", "u1");
        repo.upsert(&stored).await.unwrap();

        let found = repo.find_by_id("UC1").await.unwrap().unwrap();
        assert_eq!(found, stored);
        assert!(repo.find_by_id("UC404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_statistics_stay_missing() {
        let repo = repo().await;
        let mut stored = channel("UC1", "u1");
        stored.statistics = None;
        repo.upsert(&stored).await.unwrap();

        let found = repo.find_by_id("UC1").await.unwrap().unwrap();
        assert!(found.statistics.is_none());
    }

    #[tokio::test]
    async fn test_upsert_never_overwrites_created_at() {
        let repo = repo().await;
        let original = channel("UC1", "u1");
        repo.upsert(&original).await.unwrap();

        let mut refreshed = original.clone();
        refreshed.title = "Renamed".to_string();
        refreshed.created_at = at(20);
        refreshed.updated_at = at(20);
        repo.upsert(&refreshed).await.unwrap();

        let found = repo.find_by_id("UC1").await.unwrap().unwrap();
        assert_eq!(found.title, "Renamed");
        assert_eq!(found.created_at, original.created_at);
        assert_eq!(found.updated_at, at(20));
    }

    #[tokio::test]
    async fn test_older_snapshot_cannot_undo_newer_command() {
        let repo = repo().await;
        let snapshot = channel("UC1", "u1");
        repo.upsert(&snapshot).await.unwrap();

        let mut suspended = snapshot.clone();
        suspended.participation_status = ParticipationStatus::Suspended;
        suspended.should_sync = false;
        suspended.last_acted_at = Some(at(12));
        repo.upsert(&suspended).await.unwrap();

        let mut stale = snapshot.clone();
        stale.title = "Fresh title".to_string();
        repo.upsert(&stale).await.unwrap();

        let found = repo.find_by_id("UC1").await.unwrap().unwrap();
        assert_eq!(found.title, "Fresh title");
        assert_eq!(found.participation_status, ParticipationStatus::Suspended);
        assert!(!found.should_sync);
        assert_eq!(found.last_acted_at, Some(at(12)));
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_record() {
        let repo = repo().await;
        let mut invalid = channel("UC1", "u1");
        invalid.participation_status = ParticipationStatus::OptedOut;

        let result = repo.upsert(&invalid).await;
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
        assert!(repo.find_by_id("UC1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secondary_queries() {
        let repo = repo().await;
        let eligible = channel("UC1", "u1");

        let mut paused = channel("UC2", "u1");
        paused.should_sync = false;

        let mut opted_out = channel("UC3", "u2");
        opted_out.participation_status = ParticipationStatus::OptedOut;
        opted_out.should_sync = false;

        let mut verified = channel("UC4", "u2");
        verified.participation_status = ParticipationStatus::Verified;
        verified.target_channel_id = Some(42);

        repo.upsert_all(&[eligible, paused, opted_out, verified])
            .await
            .unwrap();

        let ingestible: Vec<_> = repo
            .find_ingestible()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ingestible, vec!["UC1".to_string(), "UC4".to_string()]);

        assert_eq!(repo.find_by_user("u1").await.unwrap().len(), 2);
        assert_eq!(
            repo.find_by_status(ParticipationStatus::OptedOut)
                .await
                .unwrap()[0]
                .id,
            "UC3"
        );
        assert_eq!(
            repo.find_by_target_channel_id(42).await.unwrap().unwrap().id,
            "UC4"
        );
        assert!(repo.find_by_target_channel_id(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_all_is_atomic() {
        let repo = repo().await;
        let good = channel("UC1", "u1");
        let mut bad = channel("UC2", "u1");
        bad.participation_status = ParticipationStatus::Suspended;

        assert!(repo.upsert_all(&[good, bad]).await.is_err());
        assert!(repo.find_by_id("UC1").await.unwrap().is_none());
    }

    /// Reads channel UC1, lets a command and a linkage land, then writes the
    /// refreshed copy of the first read.
    async fn refresh_after_local_edits(repo: &SqliteChannelRepository) -> Channel {
        let first_read = channel("UC1", "u1");
        repo.upsert(&first_read).await.unwrap();

        let mut categorised = first_read.clone();
        categorised.video_category_id = Some("10".to_string());
        categorised.last_acted_at = Some(at(5));
        repo.upsert(&categorised).await.unwrap();

        let mut linked = repo.find_by_id("UC1").await.unwrap().unwrap();
        linked.target_channel_id = Some(777);
        linked.refresh_token = "1//rotated".to_string();
        repo.upsert(&linked).await.unwrap();

        let mut refreshed = first_read;
        refreshed.title = "Fresh title".to_string();
        refreshed.updated_at = at(20);
        refreshed
    }

    #[tokio::test]
    async fn test_metadata_refresh_keeps_local_fields() {
        let repo = repo().await;
        let refreshed = refresh_after_local_edits(&repo).await;

        assert!(repo.update_external_metadata(&refreshed).await.unwrap());

        let found = repo.find_by_id("UC1").await.unwrap().unwrap();
        assert_eq!(found.title, "Fresh title");
        assert_eq!(found.updated_at, at(20));
        assert_eq!(found.video_category_id.as_deref(), Some("10"));
        assert_eq!(found.target_channel_id, Some(777));
        assert_eq!(found.refresh_token, "1//rotated");
        assert_eq!(found.last_acted_at, Some(at(5)));
    }

    #[tokio::test]
    async fn test_metadata_refresh_of_unknown_channel() {
        let repo = repo().await;
        assert!(!repo
            .update_external_metadata(&channel("UC404", "u1"))
            .await
            .unwrap());
        assert!(repo.find_by_id("UC404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_participation_update_keeps_local_fields() {
        let repo = repo().await;
        let mut revoked = refresh_after_local_edits(&repo).await;
        revoked.participation_status = ParticipationStatus::OptedOut;
        revoked.should_sync = false;
        revoked.last_acted_at = Some(at(20));

        assert!(repo.update_participation(&revoked).await.unwrap());

        let found = repo.find_by_id("UC1").await.unwrap().unwrap();
        assert_eq!(found.participation_status, ParticipationStatus::OptedOut);
        assert!(!found.should_sync);
        assert_eq!(found.last_acted_at, Some(at(20)));
        assert_eq!(found.title, "Channel UC1");
        assert_eq!(found.video_category_id.as_deref(), Some("10"));
        assert_eq!(found.target_channel_id, Some(777));
        assert_eq!(found.refresh_token, "1//rotated");
    }

    #[tokio::test]
    async fn test_participation_update_loses_to_newer_command() {
        let repo = repo().await;
        let mut stored = channel("UC1", "u1");
        stored.participation_status = ParticipationStatus::Suspended;
        stored.should_sync = false;
        stored.last_acted_at = Some(at(12));
        repo.upsert(&stored).await.unwrap();

        let mut revoked = stored.clone();
        revoked.participation_status = ParticipationStatus::OptedOut;
        revoked.last_acted_at = Some(at(10));

        assert!(!repo.update_participation(&revoked).await.unwrap());
        let found = repo.find_by_id("UC1").await.unwrap().unwrap();
        assert_eq!(found.participation_status, ParticipationStatus::Suspended);
    }
}
