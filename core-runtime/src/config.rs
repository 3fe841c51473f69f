//! # Core Configuration
//!
//! Builder for the collaborators the sync engine is wired from.
//!
//! ## Required
//!
//! - `database_url` - SQLite connection string
//! - [`PublishingBackend`] - Target system videos are pushed into
//! - [`SignatureVerifier`] - Authenticates administrative commands
//! - [`ContentSource`] - Provided by default with the `native-shims` feature
//!
//! ## Optional (defaulted)
//!
//! - [`EventTransport`] - In-process [`EventBus`]
//! - [`Clock`] - [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_url("sqlite://ytsync.db")
//!     .content_source(Arc::new(MySource))
//!     .publishing_backend(Arc::new(MyBackend))
//!     .signature_verifier(Arc::new(MyVerifier))
//!     .build()?;
//! ```
//!
//! A missing required collaborator fails at `build()` with
//! [`Error::CapabilityMissing`], never later at first use.

use crate::error::{Error, Result};
use crate::events::{EventBus, EventTransport, DEFAULT_EVENT_BUFFER_SIZE};
use bridge_traits::publishing::PublishingBackend;
use bridge_traits::signature::SignatureVerifier;
use bridge_traits::source::ContentSource;
use bridge_traits::time::{Clock, SystemClock};
use std::sync::Arc;

/// Collaborators and settings for one engine instance.
#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite connection string, e.g. `sqlite://ytsync.db` or `sqlite::memory:`
    pub database_url: String,

    pub content_source: Arc<dyn ContentSource>,

    pub publishing_backend: Arc<dyn PublishingBackend>,

    pub signature_verifier: Arc<dyn SignatureVerifier>,

    pub event_transport: Arc<dyn EventTransport>,

    /// Present when the transport is the default in-process bus, so callers
    /// can subscribe to it.
    pub event_bus: Option<EventBus>,

    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_url", &self.database_url)
            .field("content_source", &"ContentSource { ... }")
            .field("publishing_backend", &"PublishingBackend { ... }")
            .field("signature_verifier", &"SignatureVerifier { ... }")
            .field("event_transport", &"EventTransport { ... }")
            .field("event_bus", &self.event_bus)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::Config("Database url cannot be empty".to_string()));
        }

        if !self.database_url.starts_with("sqlite:") {
            return Err(Error::Config(format!(
                "Unsupported database url '{}': only sqlite is supported",
                self.database_url
            )));
        }

        Ok(())
    }
}

fn publishing_backend_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "PublishingBackend".to_string(),
        message: "A PublishingBackend implementation is required to create records and \
                  upload media. Inject one with .publishing_backend()."
            .to_string(),
    }
}

fn signature_verifier_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SignatureVerifier".to_string(),
        message: "A SignatureVerifier implementation is required to authenticate channel \
                  commands. Inject one with .signature_verifier()."
            .to_string(),
    }
}

#[cfg(feature = "native-shims")]
fn provide_default_content_source() -> Result<Arc<dyn ContentSource>> {
    use bridge_native::ReqwestHttpClient;
    use provider_youtube::{YoutubeConfig, YoutubeSource};

    let youtube = YoutubeConfig::from_env().map_err(|e| Error::CapabilityMissing {
        capability: "ContentSource".to_string(),
        message: format!("Default YouTube source could not be configured: {}", e),
    })?;
    let http = ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Default HTTP client could not be created: {}", e),
    })?;

    let source: Arc<dyn ContentSource> = Arc::new(YoutubeSource::new(Arc::new(http), youtube));
    Ok(source)
}

#[cfg(not(feature = "native-shims"))]
fn provide_default_content_source() -> Result<Arc<dyn ContentSource>> {
    Err(Error::CapabilityMissing {
        capability: "ContentSource".to_string(),
        message: "A ContentSource implementation is required to fetch channels and videos. \
                  Enable the 'native-shims' feature to use the YouTube client, or inject \
                  one with .content_source()."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_url: Option<String>,
    content_source: Option<Arc<dyn ContentSource>>,
    publishing_backend: Option<Arc<dyn PublishingBackend>>,
    signature_verifier: Option<Arc<dyn SignatureVerifier>>,
    event_transport: Option<Arc<dyn EventTransport>>,
    event_buffer_size: Option<usize>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn content_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.content_source = Some(source);
        self
    }

    pub fn publishing_backend(mut self, backend: Arc<dyn PublishingBackend>) -> Self {
        self.publishing_backend = Some(backend);
        self
    }

    pub fn signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.signature_verifier = Some(verifier);
        self
    }

    /// Replace the in-process bus with an external transport.
    pub fn event_transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.event_transport = Some(transport);
        self
    }

    /// Buffer size of the default bus. Ignored when a transport is injected.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    ///
    /// - [`Error::Config`] when the database url is missing or invalid, or
    ///   the event buffer size is zero
    /// - [`Error::CapabilityMissing`] when a required collaborator is absent
    pub fn build(self) -> Result<CoreConfig> {
        let database_url = self.database_url.ok_or_else(|| {
            Error::Config("Database url is required. Use .database_url() to set it.".to_string())
        })?;

        let publishing_backend = self
            .publishing_backend
            .ok_or_else(publishing_backend_missing_error)?;

        let signature_verifier = self
            .signature_verifier
            .ok_or_else(signature_verifier_missing_error)?;

        let content_source = match self.content_source {
            Some(source) => source,
            None => provide_default_content_source()?,
        };

        let (event_transport, event_bus) = match self.event_transport {
            Some(transport) => (transport, None),
            None => {
                let size = self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE);
                if size == 0 {
                    return Err(Error::Config(
                        "Event buffer size must be greater than 0".to_string(),
                    ));
                }
                let bus = EventBus::new(size);
                let transport: Arc<dyn EventTransport> = Arc::new(bus.clone());
                (transport, Some(bus))
            }
        };

        let config = CoreConfig {
            database_url,
            content_source,
            publishing_backend,
            signature_verifier,
            event_transport,
            event_bus,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEnvelope;
    use async_trait::async_trait;
    use bridge_traits::publishing::{
        PublishError, PublishRequest, PublishTarget, RecordHandle, UploadRequest,
    };
    use bridge_traits::source::{
        ChannelMetadata, ChannelRef, SourceCredentials, SourceError, VideoMetadata,
    };

    struct NoopSource;

    #[async_trait]
    impl ContentSource for NoopSource {
        async fn fetch_channel(
            &self,
            _credentials: &SourceCredentials,
        ) -> std::result::Result<ChannelMetadata, SourceError> {
            Err(SourceError::Transient("unused".to_string()))
        }

        async fn fetch_recent_videos(
            &self,
            _channel: &ChannelRef,
            _limit: usize,
        ) -> std::result::Result<Vec<VideoMetadata>, SourceError> {
            Ok(vec![])
        }
    }

    struct NoopBackend;

    #[async_trait]
    impl PublishingBackend for NoopBackend {
        async fn create_record(
            &self,
            _target: &PublishTarget,
            request: &PublishRequest,
        ) -> std::result::Result<RecordHandle, PublishError> {
            Ok(RecordHandle::new(format!("record-{}", request.video_id)))
        }

        async fn upload_media(
            &self,
            _target: &PublishTarget,
            _request: &UploadRequest,
        ) -> std::result::Result<(), PublishError> {
            Ok(())
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl SignatureVerifier for AcceptAll {
        async fn verify_owner(
            &self,
            _channel_id: &str,
            _message: &[u8],
            _signature: &str,
        ) -> bridge_traits::error::Result<bool> {
            Ok(true)
        }

        async fn verify_operator(
            &self,
            _message: &[u8],
            _signature: &str,
        ) -> bridge_traits::error::Result<bool> {
            Ok(true)
        }
    }

    struct DiscardTransport;

    #[async_trait]
    impl EventTransport for DiscardTransport {
        async fn publish(&self, _topic: &str, _envelope: &EventEnvelope) -> Result<()> {
            Ok(())
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .database_url("sqlite::memory:")
            .content_source(Arc::new(NoopSource))
            .publishing_backend(Arc::new(NoopBackend))
            .signature_verifier(Arc::new(AcceptAll))
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = complete_builder().build().unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert!(config.event_bus.is_some());
    }

    #[test]
    fn test_builder_requires_database_url() {
        let result = CoreConfig::builder()
            .content_source(Arc::new(NoopSource))
            .publishing_backend(Arc::new(NoopBackend))
            .signature_verifier(Arc::new(AcceptAll))
            .build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("Database url")));
    }

    #[test]
    fn test_builder_requires_publishing_backend() {
        let result = CoreConfig::builder()
            .database_url("sqlite::memory:")
            .content_source(Arc::new(NoopSource))
            .signature_verifier(Arc::new(AcceptAll))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "PublishingBackend")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_requires_signature_verifier() {
        let result = CoreConfig::builder()
            .database_url("sqlite::memory:")
            .content_source(Arc::new(NoopSource))
            .publishing_backend(Arc::new(NoopBackend))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "SignatureVerifier")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[cfg(not(feature = "native-shims"))]
    #[test]
    fn test_builder_requires_content_source_without_shims() {
        let result = CoreConfig::builder()
            .database_url("sqlite::memory:")
            .publishing_backend(Arc::new(NoopBackend))
            .signature_verifier(Arc::new(AcceptAll))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "ContentSource")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_injected_transport_replaces_bus() {
        let config = complete_builder()
            .event_transport(Arc::new(DiscardTransport))
            .build()
            .unwrap();
        assert!(config.event_bus.is_none());
    }

    #[test]
    fn test_validate_rejects_non_sqlite_url() {
        let result = complete_builder().database_url("postgres://localhost/db").build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("only sqlite")));
    }

    #[test]
    fn test_zero_event_buffer_is_rejected() {
        let result = complete_builder().event_buffer_size(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_does_not_expose_collaborators() {
        let config = complete_builder().build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("sqlite::memory:"));
        assert!(rendered.contains("PublishingBackend { ... }"));
    }
}
