use bridge_traits::error::BridgeError;
use bridge_traits::publishing::PublishError;
use bridge_traits::source::SourceError;
use core_library::LibraryError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transient external failure: {0}")]
    TransientExternal(String),

    #[error("Access revoked by owner: {0}")]
    AuthRevoked(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Store error: {0}")]
    Library(LibraryError),
}

impl SyncError {
    pub fn not_found(entity_type: &str, id: &str) -> Self {
        SyncError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Failures worth trying again on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientExternal(_) | SyncError::Timeout { .. }
        )
    }
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::NotFound { entity_type, id } => SyncError::NotFound { entity_type, id },
            LibraryError::InvalidStateTransition { from, to, reason } => {
                SyncError::InvalidStateTransition { from, to, reason }
            }
            LibraryError::InvalidInput { field, message } => {
                SyncError::Validation(format!("{}: {}", field, message))
            }
            other => SyncError::Library(other),
        }
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::AuthRevoked(msg) => SyncError::AuthRevoked(msg),
            SourceError::Transient(msg) | SourceError::Malformed(msg) => {
                SyncError::TransientExternal(msg)
            }
        }
    }
}

impl From<PublishError> for SyncError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Rejected(msg) => SyncError::Publish(msg),
            PublishError::Unavailable(msg) => SyncError::TransientExternal(msg),
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout(op) => SyncError::Timeout {
                operation: op,
                millis: 0,
            },
            other => SyncError::TransientExternal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Run `fut` under `limit`. Elapsed time becomes [`SyncError::Timeout`].
pub(crate) async fn with_timeout<T, E, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<SyncError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(SyncError::Timeout {
            operation: operation.to_string(),
            millis: duration_millis(limit),
        }),
    }
}
