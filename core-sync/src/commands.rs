//! # Channel Commands
//!
//! Signed administrative changes to a channel's participation status and
//! ingestion flag.
//!
//! A command is applied only when its signature verifies against the right
//! authority and its `issued_at` is strictly later than the channel's
//! `last_acted_at`. A rejected command leaves the stored record untouched.

use crate::emitter::{channel_snapshot, EventEmitter};
use crate::error::{with_timeout, Result, SyncError};
use bridge_traits::signature::SignatureVerifier;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::models::{Channel, ParticipationStatus};
use core_library::repositories::ChannelRepository;
use core_runtime::events::{LifecycleEvent, Topic};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Who must have signed a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandAuthority {
    Owner,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelAction {
    /// Owner toggles ingestion, optionally choosing the publish category
    SetIngestion {
        should_sync: bool,
        video_category_id: Option<String>,
    },
    OptOut,
    Suspend,
    Unsuspend,
    Verify,
    Unverify,
}

impl ChannelAction {
    pub fn authority(&self) -> CommandAuthority {
        match self {
            ChannelAction::SetIngestion { .. } | ChannelAction::OptOut => CommandAuthority::Owner,
            ChannelAction::Suspend
            | ChannelAction::Unsuspend
            | ChannelAction::Verify
            | ChannelAction::Unverify => CommandAuthority::Operator,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelAction::SetIngestion { .. } => "SetIngestion",
            ChannelAction::OptOut => "OptOut",
            ChannelAction::Suspend => "Suspend",
            ChannelAction::Unsuspend => "Unsuspend",
            ChannelAction::Verify => "Verify",
            ChannelAction::Unverify => "Unverify",
        }
    }

    /// Apply the action to `channel`, or explain why its status forbids it.
    fn apply(&self, channel: &mut Channel) -> std::result::Result<(), String> {
        let status = channel.participation_status;
        match self {
            ChannelAction::SetIngestion {
                should_sync,
                video_category_id,
            } => {
                if status.blocks_sync() {
                    return Err(format!("Ingestion cannot be changed on a {} channel", status));
                }
                channel.should_sync = *should_sync;
                if let Some(category) = video_category_id {
                    channel.video_category_id = Some(category.clone());
                }
            }
            ChannelAction::OptOut => {
                move_status(channel, ParticipationStatus::OptedOut)?;
                channel.should_sync = false;
            }
            ChannelAction::Suspend => {
                move_status(channel, ParticipationStatus::Suspended)?;
                channel.should_sync = false;
            }
            ChannelAction::Unsuspend => {
                if status != ParticipationStatus::Suspended {
                    return Err(format!("Only a Suspended channel can be unsuspended, not {}", status));
                }
                move_status(channel, ParticipationStatus::Unverified)?;
            }
            ChannelAction::Verify => {
                if status != ParticipationStatus::Unverified {
                    return Err(format!("Only an Unverified channel can be verified, not {}", status));
                }
                move_status(channel, ParticipationStatus::Verified)?;
            }
            ChannelAction::Unverify => {
                if status != ParticipationStatus::Verified {
                    return Err(format!("Only a Verified channel can be unverified, not {}", status));
                }
                move_status(channel, ParticipationStatus::Unverified)?;
            }
        }
        Ok(())
    }
}

fn move_status(channel: &mut Channel, to: ParticipationStatus) -> std::result::Result<(), String> {
    channel
        .participation_status
        .validate_transition(to)
        .map_err(|e| e.to_string())?;
    channel.participation_status = to;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCommand {
    pub issued_at: DateTime<Utc>,
    pub action: ChannelAction,
    pub signature: String,
}

#[derive(Serialize)]
struct CanonicalCommand<'a> {
    channel_id: &'a str,
    issued_at: i64,
    action: &'a ChannelAction,
}

impl SignedCommand {
    pub fn new(issued_at: DateTime<Utc>, action: ChannelAction, signature: impl Into<String>) -> Self {
        Self {
            issued_at,
            action,
            signature: signature.into(),
        }
    }

    /// The bytes the signature covers: compact JSON of the channel id, the
    /// issue time in unix millis and the action.
    pub fn canonical_message(&self, channel_id: &str) -> Result<Vec<u8>> {
        serde_json::to_vec(&CanonicalCommand {
            channel_id,
            issued_at: self.issued_at.timestamp_millis(),
            action: &self.action,
        })
        .map_err(|e| SyncError::Validation(format!("Command cannot be encoded: {}", e)))
    }
}

pub struct CommandProcessor {
    channels: Arc<dyn ChannelRepository>,
    verifier: Arc<dyn SignatureVerifier>,
    emitter: EventEmitter,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl CommandProcessor {
    pub fn new(
        channels: Arc<dyn ChannelRepository>,
        verifier: Arc<dyn SignatureVerifier>,
        emitter: EventEmitter,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            channels,
            verifier,
            emitter,
            clock,
            timeout,
        }
    }

    /// Verify and apply `command` to the channel, returning the stored result.
    ///
    /// # Errors
    /// - `NotFound` when the channel does not exist
    /// - `Validation` for a bad signature, a stale timestamp or a status that
    ///   forbids the action
    #[instrument(skip(self, command), fields(channel_id = %channel_id, action = command.action.name()))]
    pub async fn apply(&self, channel_id: &str, command: &SignedCommand) -> Result<Channel> {
        let stored = with_timeout(
            self.timeout,
            "find_channel",
            self.channels.find_by_id(channel_id),
        )
        .await?
        .ok_or_else(|| SyncError::not_found("Channel", channel_id))?;

        self.verify(channel_id, command).await?;

        if let Some(last) = stored.last_acted_at {
            if command.issued_at <= last {
                warn!(issued_at = %command.issued_at, last_acted_at = %last, "Stale command rejected");
                return Err(SyncError::Validation(format!(
                    "Command issued at {} is not newer than the last action at {}",
                    command.issued_at, last
                )));
            }
        }

        let mut updated = stored.clone();
        command.action.apply(&mut updated).map_err(|reason| {
            warn!(reason = %reason, "Command rejected by status");
            SyncError::Validation(reason)
        })?;
        updated.last_acted_at = Some(command.issued_at);
        updated.updated_at = self.clock.now();

        with_timeout(self.timeout, "upsert_channel", self.channels.upsert(&updated)).await?;

        info!(
            status = %updated.participation_status,
            should_sync = updated.should_sync,
            "Channel command applied"
        );

        if updated.is_ingestible() && !stored.is_ingestible() {
            self.emitter
                .emit(
                    Topic::ChannelEvents,
                    LifecycleEvent::IngestChannel(channel_snapshot(&updated)),
                )
                .await;
        }

        Ok(updated)
    }

    async fn verify(&self, channel_id: &str, command: &SignedCommand) -> Result<()> {
        let message = command.canonical_message(channel_id)?;
        let valid = match command.action.authority() {
            CommandAuthority::Owner => {
                with_timeout(
                    self.timeout,
                    "verify_owner",
                    self.verifier
                        .verify_owner(channel_id, &message, &command.signature),
                )
                .await?
            }
            CommandAuthority::Operator => {
                with_timeout(
                    self.timeout,
                    "verify_operator",
                    self.verifier.verify_operator(&message, &command.signature),
                )
                .await?
            }
        };

        if !valid {
            warn!(authority = ?command.action.authority(), "Command signature rejected");
            return Err(SyncError::Validation("Invalid command signature".to_string()));
        }
        Ok(())
    }
}
