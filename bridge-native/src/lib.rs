//! # Native Bridge Implementations
//!
//! Default implementations of bridge traits for server deployments.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` with rustls
//!
//! The YouTube source and the service wiring pick this client up when the
//! `native-shims` feature is enabled.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_native::ReqwestHttpClient;
//! use bridge_traits::HttpClient;
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let response = http_client.execute(HttpRequest::get(url)).await?;
//! ```

mod http;

pub use http::ReqwestHttpClient;
