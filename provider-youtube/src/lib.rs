//! # YouTube Provider
//!
//! Implements `ContentSource` for the YouTube Data API v3.
//!
//! ## Overview
//!
//! This module provides:
//! - OAuth 2.0 access token refresh, with `invalid_grant` reported as a revocation
//! - Channel discovery for the authorized owner (`channels?mine=true`)
//! - Recent uploads through the channel's uploads playlist
//! - Retry with exponential backoff on rate limits and server errors

mod auth;
pub mod config;
pub mod connector;
pub mod error;
mod retry;
pub mod types;

pub use config::YoutubeConfig;
pub use connector::YoutubeSource;
pub use error::{Result, YoutubeError};
