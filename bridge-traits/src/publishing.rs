//! Publishing Backend Abstraction
//!
//! The target system videos are pushed into: a record is created for each
//! video, then its media is uploaded against that record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::source::Thumbnails;

/// Opaque handle to a record created in the publishing backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHandle(String);

impl RecordHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Publishing backend errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The backend refused the operation (validation, quota, missing linkage).
    #[error("Publishing backend rejected the request: {0}")]
    Rejected(String),

    /// The backend could not be reached or timed out.
    #[error("Publishing backend unavailable: {0}")]
    Unavailable(String),
}

/// Where a video is published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    /// Source channel identifier
    pub channel_id: String,
    /// Linked channel in the publishing backend, when one is known
    pub target_channel_id: Option<i64>,
    pub video_category_id: Option<String>,
}

/// Descriptive fields sent when creating a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub duration: String,
    pub thumbnails: Thumbnails,
    pub published_at: Option<DateTime<Utc>>,
    pub source_url: String,
}

/// Media upload against a previously created record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub video_id: String,
    pub source_url: String,
    pub handle: RecordHandle,
}

/// Publishing backend trait
///
/// Calls are not assumed idempotent. The engine claims a video in the store
/// before calling [`create_record`](PublishingBackend::create_record) so that
/// concurrent consumers of the same event normally skip.
#[async_trait]
pub trait PublishingBackend: Send + Sync {
    /// Create the record for one video and return its handle.
    async fn create_record(
        &self,
        target: &PublishTarget,
        request: &PublishRequest,
    ) -> Result<RecordHandle, PublishError>;

    /// Upload the binary media for a video whose record already exists.
    async fn upload_media(
        &self,
        target: &PublishTarget,
        request: &UploadRequest,
    ) -> Result<(), PublishError>;
}
