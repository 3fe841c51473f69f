//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service`, `provider-youtube`). Host
//! applications can depend on `ytsync-workspace` and enable the documented
//! features without needing to wire each crate individually.

#[cfg(feature = "native-shims")]
pub use core_service::{CoreError, SyncService};
