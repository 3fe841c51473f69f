//! # Core Runtime
//!
//! Runtime infrastructure shared by the sync engine crates:
//! - Logging and tracing setup
//! - Collaborator configuration with fail-fast validation
//! - Lifecycle events and the transport they are published through
//!
//! Nothing here knows about channels or videos beyond the event snapshots;
//! the domain lives in `core-library` and `core-sync`.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
