//! YouTube client configuration
//!
//! Built explicitly with the `with_*` builders, or read from the environment:
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `YTSYNC_YOUTUBE_CLIENT_ID` | yes | |
//! | `YTSYNC_YOUTUBE_CLIENT_SECRET` | yes | |
//! | `YTSYNC_YOUTUBE_API_BASE_URL` | no | `https://www.googleapis.com/youtube/v3` |
//! | `YTSYNC_YOUTUBE_TOKEN_URL` | no | `https://oauth2.googleapis.com/token` |
//! | `YTSYNC_YOUTUBE_TIMEOUT_SECS` | no | `30` |
//! | `YTSYNC_YOUTUBE_MAX_ATTEMPTS` | no | `3` |

use std::fmt;
use std::time::Duration;

use crate::error::{Result, YoutubeError};

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const ENV_PREFIX: &str = "YTSYNC_YOUTUBE_";

#[derive(Clone, PartialEq, Eq)]
pub struct YoutubeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base_url: String,
    pub token_url: String,
    /// Per-request timeout handed to the HTTP client
    pub request_timeout: Duration,
    /// Attempts per request, including the first one
    pub max_attempts: u32,
    /// First backoff delay; doubles on each retry
    pub retry_base_delay: Duration,
}

impl YoutubeConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }

    /// Read the configuration from `YTSYNC_YOUTUBE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. `from_env` uses the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, suffix)).filter(|value| !value.trim().is_empty())
        };
        let required = |suffix: &str| {
            var(suffix).ok_or_else(|| {
                YoutubeError::Config(format!("{}{} is not set", ENV_PREFIX, suffix))
            })
        };

        let mut config = Self::new(required("CLIENT_ID")?, required("CLIENT_SECRET")?);

        if let Some(url) = var("API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = var("TOKEN_URL") {
            config.token_url = url;
        }
        if let Some(secs) = var("TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                YoutubeError::Config(format!("Invalid {}TIMEOUT_SECS value: {}", ENV_PREFIX, secs))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = var("MAX_ATTEMPTS") {
            config.max_attempts = attempts.trim().parse().map_err(|_| {
                YoutubeError::Config(format!(
                    "Invalid {}MAX_ATTEMPTS value: {}",
                    ENV_PREFIX, attempts
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(YoutubeError::Config("client_id cannot be empty".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(YoutubeError::Config(
                "client_secret cannot be empty".to_string(),
            ));
        }
        for (name, url) in [("api_base_url", &self.api_base_url), ("token_url", &self.token_url)] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(YoutubeError::Config(format!(
                    "{} must be an http(s) URL, got {}",
                    name, url
                )));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(YoutubeError::Config(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(YoutubeError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn api_url(&self, resource: &str) -> String {
        format!("{}/{}", self.api_base_url.trim_end_matches('/'), resource)
    }
}

impl fmt::Debug for YoutubeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YoutubeConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay", &self.retry_base_delay)
            .finish()
    }
}
