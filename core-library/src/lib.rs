//! # Channel & Video Store
//!
//! Owns the local mirror of channels, videos and users, and the repositories
//! the sync engine reads and writes through.
//!
//! ## Overview
//!
//! - Domain models with their lifecycle rules ([`models`])
//! - SQLite pool setup and embedded migrations ([`db`])
//! - Repository traits with SQLite implementations ([`repositories`])
//!
//! The store is the only synchronization point between workers: every
//! state change a worker makes goes through a full-record upsert or a
//! conditional compare-and-swap.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
