//! # Host Bridge Traits
//!
//! Contracts between the sync engine and the external systems it drives.
//!
//! ## Overview
//!
//! The engine never talks to YouTube, the publishing backend or a signing
//! service directly. Each of those collaborators is reached through a trait
//! defined here, so deployments can swap implementations and tests can inject
//! fakes.
//!
//! ## Traits
//!
//! ### External systems
//! - [`ContentSource`](source::ContentSource) - Fetch channel metadata and recent uploads
//! - [`PublishingBackend`](publishing::PublishingBackend) - Create records and upload media
//! - [`SignatureVerifier`](signature::SignatureVerifier) - Authenticate administrative commands
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with retry
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic ordering guards
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to a host pipeline
//!
//! ## Error Handling
//!
//! Plumbing-level traits (`HttpClient`, `LoggerSink`) use
//! [`BridgeError`](error::BridgeError). Domain seams carry their own typed
//! errors ([`SourceError`](source::SourceError),
//! [`PublishError`](publishing::PublishError)) because the engine branches on
//! the failure kind.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across worker tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod publishing;
pub mod signature;
pub mod source;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use publishing::{
    PublishError, PublishRequest, PublishTarget, PublishingBackend, RecordHandle, UploadRequest,
};
pub use signature::SignatureVerifier;
pub use source::{
    ChannelMetadata, ChannelRef, ChannelStatistics, ContentSource, PrivacyStatus,
    ProcessingStatus, SourceCredentials, SourceError, Thumbnails, VideoMetadata,
};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
