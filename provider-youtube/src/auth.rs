//! OAuth access token refresh
//!
//! Access tokens expire after an hour; the refresh token stored with the
//! channel is exchanged for a new one whenever the API answers 401. A token
//! endpoint `invalid_grant` means the owner revoked the app's access.

use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use bridge_traits::source::SourceCredentials;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::YoutubeConfig;
use crate::error::{Result, YoutubeError};
use crate::retry::{execute_with_backoff, policy_for};
use crate::types::{OAuthErrorResponse, TokenResponse};

const INVALID_GRANT: &str = "invalid_grant";

pub(crate) struct AccessTokens {
    http_client: Arc<dyn HttpClient>,
    config: YoutubeConfig,
    policy: RetryPolicy,
    /// Refreshed access tokens by owner id
    refreshed: RwLock<HashMap<String, String>>,
}

impl AccessTokens {
    pub(crate) fn new(http_client: Arc<dyn HttpClient>, config: YoutubeConfig) -> Self {
        let policy = policy_for(&config);
        Self {
            http_client,
            config,
            policy,
            refreshed: RwLock::new(HashMap::new()),
        }
    }

    /// Best known access token: a previously refreshed one, else the stored
    /// one. `None` when neither exists.
    pub(crate) async fn current(&self, credentials: &SourceCredentials) -> Option<String> {
        if let Some(token) = self.refreshed.read().await.get(&credentials.owner_id) {
            return Some(token.clone());
        }
        Some(credentials.access_token.clone()).filter(|token| !token.is_empty())
    }

    #[instrument(skip(self, credentials), fields(owner_id = %credentials.owner_id))]
    pub(crate) async fn refresh(&self, credentials: &SourceCredentials) -> Result<String> {
        if credentials.refresh_token.is_empty() {
            return Err(YoutubeError::TokenRefreshFailed(
                "No refresh token stored for owner".to_string(),
            ));
        }

        let body = serde_urlencoded::to_string([
            ("grant_type", "refresh_token"),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ])
        .map_err(|e| {
            YoutubeError::TokenRefreshFailed(format!("Failed to encode token request: {}", e))
        })?;

        debug!("Refreshing access token");
        let request = HttpRequest::post(self.config.token_url.clone())
            .form(body)
            .header("Accept", "application/json")
            .timeout(self.config.request_timeout);

        let response = execute_with_backoff(self.http_client.as_ref(), request, &self.policy).await?;

        if response.is_success() {
            let token: TokenResponse = response.json().map_err(|e| {
                YoutubeError::ParseError(format!("Failed to parse token response: {}", e))
            })?;
            if token.access_token.is_empty() {
                return Err(YoutubeError::TokenRefreshFailed(
                    "Token endpoint returned an empty access token".to_string(),
                ));
            }

            info!(expires_in = token.expires_in, "Access token refreshed");
            self.refreshed
                .write()
                .await
                .insert(credentials.owner_id.clone(), token.access_token.clone());
            return Ok(token.access_token);
        }

        let status = response.status;
        if response.is_client_error() {
            if let Ok(error) = response.json::<OAuthErrorResponse>() {
                if error.error == INVALID_GRANT {
                    warn!("Refresh token revoked by owner");
                    self.refreshed.write().await.remove(&credentials.owner_id);
                    return Err(YoutubeError::AuthRevoked(
                        error
                            .error_description
                            .unwrap_or_else(|| INVALID_GRANT.to_string()),
                    ));
                }
                warn!(status = status, error = %error.error, "Token refresh rejected");
                return Err(YoutubeError::TokenRefreshFailed(format!(
                    "Token endpoint returned {}: {}",
                    status, error.error
                )));
            }
        }

        warn!(status = status, "Token refresh failed");
        Err(YoutubeError::TokenRefreshFailed(format!(
            "Token endpoint returned {}",
            status
        )))
    }
}
