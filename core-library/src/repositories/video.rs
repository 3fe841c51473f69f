//! Video repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{from_millis, to_millis, Video, VideoState};
use crate::repositories::{decode_thumbnails, encode_thumbnails};
use async_trait::async_trait;
use bridge_traits::publishing::RecordHandle;
use bridge_traits::source::{PrivacyStatus, ProcessingStatus};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{FromRow, Sqlite, SqlitePool};
use tracing::debug;

/// Video repository interface
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Video>>;

    /// Videos of one channel, newest publication first.
    async fn find_by_channel(&self, channel_id: &str) -> Result<Vec<Video>>;

    async fn find_by_state(&self, state: VideoState) -> Result<Vec<Video>>;

    /// Insert or replace the full record.
    ///
    /// Descriptive fields are always refreshed and `created_at` is never
    /// overwritten. State, handle and `updated_at` are only taken from
    /// `video` when its `updated_at` is not older than the stored one, so a
    /// merge built from an older read cannot undo a concurrent claim.
    async fn upsert(&self, video: &Video) -> Result<()>;

    /// Upsert every record in one transaction.
    async fn upsert_all(&self, videos: &[Video]) -> Result<()>;

    /// Atomically move `current` to `next`'s state, handle and `updated_at`,
    /// provided the stored row still has `current`'s state and `updated_at`.
    ///
    /// # Returns
    /// - `Ok(true)` if this caller won the swap
    /// - `Ok(false)` if the row changed underneath it (or does not exist)
    ///
    /// # Errors
    /// `InvalidStateTransition` when the edge is outside the pipeline graph.
    async fn compare_and_swap_state(&self, current: &Video, next: &Video) -> Result<bool>;
}

/// SQLite implementation of VideoRepository
pub struct SqliteVideoRepository {
    pool: SqlitePool,
}

impl SqliteVideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_VIDEO: &str = r#"
    SELECT id, channel_id, url, title, description, playlist_id, resource_id, thumbnails,
           duration, published_at, processing_status, privacy_status, state,
           publish_handle, created_at, updated_at
    FROM videos
"#;

const UPSERT_VIDEO: &str = r#"
    INSERT INTO videos (
        id, channel_id, url, title, description, playlist_id, resource_id, thumbnails,
        duration, published_at, processing_status, privacy_status, state,
        publish_handle, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        url = excluded.url,
        title = excluded.title,
        description = excluded.description,
        playlist_id = excluded.playlist_id,
        resource_id = excluded.resource_id,
        thumbnails = excluded.thumbnails,
        duration = excluded.duration,
        published_at = excluded.published_at,
        processing_status = excluded.processing_status,
        privacy_status = excluded.privacy_status,
        state = CASE WHEN excluded.updated_at >= videos.updated_at
            THEN excluded.state ELSE videos.state END,
        publish_handle = CASE WHEN excluded.updated_at >= videos.updated_at
            THEN excluded.publish_handle ELSE videos.publish_handle END,
        updated_at = MAX(excluded.updated_at, videos.updated_at)
"#;

/// Database row representation of a video
#[derive(Debug, FromRow)]
struct VideoRow {
    id: String,
    channel_id: String,
    url: String,
    title: String,
    description: String,
    playlist_id: String,
    resource_id: String,
    thumbnails: String,
    duration: String,
    published_at: Option<i64>,
    processing_status: String,
    privacy_status: String,
    state: String,
    publish_handle: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<VideoRow> for Video {
    type Error = LibraryError;

    fn try_from(row: VideoRow) -> Result<Self> {
        Ok(Video {
            id: row.id,
            channel_id: row.channel_id,
            url: row.url,
            title: row.title,
            description: row.description,
            playlist_id: row.playlist_id,
            resource_id: row.resource_id,
            thumbnails: decode_thumbnails(&row.thumbnails)?,
            duration: row.duration,
            published_at: row
                .published_at
                .map(|ms| from_millis("published_at", ms))
                .transpose()?,
            processing_status: ProcessingStatus::parse(&row.processing_status),
            privacy_status: PrivacyStatus::parse(&row.privacy_status),
            state: row.state.parse()?,
            publish_handle: row.publish_handle.map(RecordHandle::new),
            created_at: from_millis("created_at", row.created_at)?,
            updated_at: from_millis("updated_at", row.updated_at)?,
        })
    }
}

fn upsert_query(video: &Video) -> Result<Query<'_, Sqlite, SqliteArguments<'_>>> {
    video.validate()
        .map_err(|msg| LibraryError::invalid_input("video", msg))?;

    let thumbnails = encode_thumbnails(&video.thumbnails)?;

    Ok(sqlx::query(UPSERT_VIDEO)
        .bind(&video.id)
        .bind(&video.channel_id)
        .bind(&video.url)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.playlist_id)
        .bind(&video.resource_id)
        .bind(thumbnails)
        .bind(&video.duration)
        .bind(video.published_at.map(to_millis))
        .bind(video.processing_status.as_str())
        .bind(video.privacy_status.as_str())
        .bind(video.state.as_str())
        .bind(video.publish_handle.as_ref().map(|h| h.as_str()))
        .bind(to_millis(video.created_at))
        .bind(to_millis(video.updated_at)))
}

#[async_trait]
impl VideoRepository for SqliteVideoRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Video>> {
        let sql = format!("{} WHERE id = ?", SELECT_VIDEO);
        let row = sqlx::query_as::<_, VideoRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Video::try_from).transpose()
    }

    async fn find_by_channel(&self, channel_id: &str) -> Result<Vec<Video>> {
        let sql = format!(
            "{} WHERE channel_id = ? ORDER BY published_at DESC, id",
            SELECT_VIDEO
        );
        let rows = sqlx::query_as::<_, VideoRow>(&sql)
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Video::try_from).collect()
    }

    async fn find_by_state(&self, state: VideoState) -> Result<Vec<Video>> {
        let sql = format!("{} WHERE state = ? ORDER BY updated_at, id", SELECT_VIDEO);
        let rows = sqlx::query_as::<_, VideoRow>(&sql)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Video::try_from).collect()
    }

    async fn upsert(&self, video: &Video) -> Result<()> {
        upsert_query(video)?.execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_all(&self, videos: &[Video]) -> Result<()> {
        if videos.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for video in videos {
            upsert_query(video)?.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(count = videos.len(), "Videos upserted");
        Ok(())
    }

    async fn compare_and_swap_state(&self, current: &Video, next: &Video) -> Result<bool> {
        current.state.validate_transition(next.state)?;

        let result = sqlx::query(
            r#"
            UPDATE videos
            SET state = ?, publish_handle = ?, updated_at = ?
            WHERE id = ? AND state = ? AND updated_at = ?
            "#,
        )
        .bind(next.state.as_str())
        .bind(next.publish_handle.as_ref().map(|h| h.as_str()))
        .bind(to_millis(next.updated_at))
        .bind(&current.id)
        .bind(current.state.as_str())
        .bind(to_millis(current.updated_at))
        .execute(&self.pool)
        .await?;

        let swapped = result.rows_affected() == 1;
        debug!(
            video_id = %current.id,
            from = current.state.as_str(),
            to = next.state.as_str(),
            swapped,
            "Video state compare-and-swap"
        );
        Ok(swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::fixtures::{at, channel, video};
    use crate::repositories::{ChannelRepository, SqliteChannelRepository};

    async fn repo() -> SqliteVideoRepository {
        let pool = create_test_pool().await.unwrap();
        let channels = SqliteChannelRepository::new(pool.clone());
        channels.upsert(&channel("UC1", "u1")).await.unwrap();
        channels.upsert(&channel("UC2", "u1")).await.unwrap();
        SqliteVideoRepository::new(pool)
    }

    #[tokio::test]
    async fn test_upsert_and_find_roundtrip() {
        let repo = repo().await;
        let stored = video("v1", "UC1");
        repo.upsert(&stored).await.unwrap();

        assert_eq!(repo.find_by_id("v1").await.unwrap(), Some(stored));
        assert!(repo.find_by_id("v404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_video_requires_stored_channel() {
        let repo = repo().await;
        let orphan = video("v1", "UC404");
        assert!(matches!(
            repo.upsert(&orphan).await,
            Err(LibraryError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_all_and_secondary_queries() {
        let repo = repo().await;
        let mut older = video("v1", "UC1");
        older.published_at = Some(at(1));
        let newer = video("v2", "UC1");
        let mut failed = video("v3", "UC2");
        failed.state = VideoState::PublishFailed;

        repo.upsert_all(&[older, newer, failed]).await.unwrap();

        let ids: Vec<_> = repo
            .find_by_channel("UC1")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec!["v2".to_string(), "v1".to_string()]);

        let failed = repo.find_by_state(VideoState::PublishFailed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "v3");
    }

    #[tokio::test]
    async fn test_compare_and_swap_claims_once() {
        let repo = repo().await;
        let stored = video("v1", "UC1");
        repo.upsert(&stored).await.unwrap();

        let mut claimed = stored.clone();
        claimed.transition(VideoState::Publishing, at(11)).unwrap();

        assert!(repo.compare_and_swap_state(&stored, &claimed).await.unwrap());
        assert!(!repo.compare_and_swap_state(&stored, &claimed).await.unwrap());

        let found = repo.find_by_id("v1").await.unwrap().unwrap();
        assert_eq!(found.state, VideoState::Publishing);
        assert_eq!(found.updated_at, at(11));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_invalid_edge() {
        let repo = repo().await;
        let mut stored = video("v1", "UC1");
        stored.state = VideoState::PublishSucceeded;
        stored.publish_handle = Some(RecordHandle::new("rec-1"));
        repo.upsert(&stored).await.unwrap();

        let mut next = stored.clone();
        next.state = VideoState::Publishing;

        let result = repo.compare_and_swap_state(&stored, &next).await;
        assert!(matches!(
            result,
            Err(LibraryError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_merge_does_not_undo_claim() {
        let repo = repo().await;
        let stored = video("v1", "UC1");
        repo.upsert(&stored).await.unwrap();

        let mut claimed = stored.clone();
        claimed.transition(VideoState::Publishing, at(11)).unwrap();
        assert!(repo.compare_and_swap_state(&stored, &claimed).await.unwrap());

        let mut merged = stored.clone();
        merged.title = "Edited on the source".to_string();
        merged.created_at = at(23);
        repo.upsert(&merged).await.unwrap();

        let found = repo.find_by_id("v1").await.unwrap().unwrap();
        assert_eq!(found.title, "Edited on the source");
        assert_eq!(found.state, VideoState::Publishing);
        assert_eq!(found.updated_at, at(11));
        assert_eq!(found.created_at, stored.created_at);
    }
}
