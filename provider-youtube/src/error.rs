//! Error types for the YouTube provider

use bridge_traits::error::BridgeError;
use bridge_traits::source::SourceError;
use thiserror::Error;

/// YouTube provider errors
#[derive(Error, Debug)]
pub enum YoutubeError {
    /// Provider configuration is missing or invalid
    #[error("Invalid YouTube configuration: {0}")]
    Config(String),

    /// The token endpoint answered `invalid_grant`
    #[error("Access revoked by owner: {0}")]
    AuthRevoked(String),

    /// Token refresh failed for any other reason
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// API request returned an error
    #[error("YouTube API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_seconds} seconds")]
    RateLimitExceeded { retry_after_seconds: u64 },

    /// The owner has no channel
    #[error("No channel found for owner: {owner_id}")]
    ChannelNotFound { owner_id: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for YouTube operations
pub type Result<T> = std::result::Result<T, YoutubeError>;

impl From<YoutubeError> for SourceError {
    fn from(error: YoutubeError) -> Self {
        match error {
            YoutubeError::AuthRevoked(msg) => SourceError::AuthRevoked(msg),
            e @ (YoutubeError::ParseError(_) | YoutubeError::ChannelNotFound { .. }) => {
                SourceError::Malformed(e.to_string())
            }
            other => SourceError::Transient(other.to_string()),
        }
    }
}
