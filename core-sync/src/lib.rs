//! # Sync Engine
//!
//! Mirrors creator channels and uploads into the local store and drives each
//! video through the publish pipeline.
//!
//! ## Overview
//!
//! One ingestion cycle:
//!
//! ```text
//! classify → reconcile channels → reconcile videos → (publish) → emit
//! ```
//!
//! Data flows one way: source → reconciliation → store → publish state
//! machine → publishing backend → store → event stream. The coordinator
//! keeps no state between cycles; everything it needs is re-read from the
//! store.
//!
//! ## Components
//!
//! - **Frequency Classifier** (`frequency`): Buckets channels into ingestion cadences
//! - **Channel Reconciler** (`channel_reconciler`): Refreshes channel metadata, detects revoked access
//! - **Video Reconciler** (`video_reconciler`): Merges recent uploads and announces those needing a publish
//! - **Publish State Machine** (`publish`): Claims, publishes and uploads one video
//! - **Channel Commands** (`commands`): Signed, timestamp-ordered status changes
//! - **Event Emitter** (`emitter`): Wraps transitions into lifecycle events
//! - **Sync Coordinator** (`coordinator`): Entry point tying the above together

pub mod channel_reconciler;
pub mod commands;
pub mod coordinator;
pub mod emitter;
pub mod error;
pub mod frequency;
pub mod publish;
pub mod video_reconciler;

pub use channel_reconciler::{merge_channel_metadata, ChannelReconciler, ChannelReconciliation};
pub use commands::{ChannelAction, CommandAuthority, CommandProcessor, SignedCommand};
pub use coordinator::{CycleReport, SyncConfig, SyncCoordinator, SyncDependencies};
pub use emitter::EventEmitter;
pub use error::{Result, SyncError};
pub use frequency::{classify, FrequencyBucket, FrequencyThresholds};
pub use publish::{PublishOutcome, PublishStateMachine, SkipReason};
pub use video_reconciler::{merge_video, VideoReconciler, VideoReconciliation};
