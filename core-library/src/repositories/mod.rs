//! # Repositories
//!
//! Store seams the sync engine reads and writes through, with SQLite
//! implementations on `sqlx`.
//!
//! - `ChannelRepository` - Channels by id, owner, status and publishing linkage
//! - `VideoRepository` - Videos by id, channel and state, plus the state
//!   compare-and-swap used to claim work
//! - `UserRepository` - Registered owners
//!
//! Full-record upserts never move locally owned fields backwards: a writer
//! holding an older snapshot refreshes the external metadata but cannot
//! overwrite a newer status or publish state.

pub mod channel;
pub mod user;
pub mod video;

pub use channel::{ChannelRepository, SqliteChannelRepository};
pub use user::{SqliteUserRepository, UserRepository};
pub use video::{SqliteVideoRepository, VideoRepository};

use crate::error::{LibraryError, Result};
use bridge_traits::source::Thumbnails;

pub(crate) fn encode_thumbnails(thumbnails: &Thumbnails) -> Result<String> {
    serde_json::to_string(thumbnails)
        .map_err(|e| LibraryError::invalid_input("thumbnails", e.to_string()))
}

pub(crate) fn decode_thumbnails(raw: &str) -> Result<Thumbnails> {
    serde_json::from_str(raw)
        .map_err(|e| LibraryError::invalid_input("thumbnails", e.to_string()))
}
