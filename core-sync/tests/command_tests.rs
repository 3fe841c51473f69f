//! Integration tests for signed channel commands

mod common;

use chrono::Duration;
use common::{at, user, Harness};
use core_library::models::ParticipationStatus;
use core_library::repositories::ChannelRepository;
use core_sync::{ChannelAction, SignedCommand, SyncError};

fn set_ingestion(should_sync: bool) -> ChannelAction {
    ChannelAction::SetIngestion {
        should_sync,
        video_category_id: None,
    }
}

#[tokio::test]
async fn test_owner_toggles_ingestion() {
    let mut h = Harness::new().await;
    h.seed_channel(&user("u1"), "UC1", Some(2_500)).await;

    let off = SignedCommand::new(at(13), set_ingestion(false), "owner-ok");
    let channel = h.coordinator.apply_channel_command("UC1", &off).await.unwrap();
    assert!(!channel.should_sync);
    assert_eq!(channel.last_acted_at, Some(at(13)));
    assert_eq!(h.stored_channel("UC1").await, channel);
    assert!(h.drain_events().is_empty());

    let on = SignedCommand::new(
        at(14),
        ChannelAction::SetIngestion {
            should_sync: true,
            video_category_id: Some("20".to_string()),
        },
        "owner-ok",
    );
    let channel = h.coordinator.apply_channel_command("UC1", &on).await.unwrap();
    assert!(channel.should_sync);
    assert_eq!(channel.video_category_id.as_deref(), Some("20"));

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].topic, "channelEvents");
    assert_eq!(events[0].envelope.event.subject(), "IngestChannel");
}

#[tokio::test]
async fn test_stale_command_is_rejected_and_record_unchanged() {
    let h = Harness::new().await;
    h.seed_channel(&user("u1"), "UC1", Some(2_500)).await;
    h.coordinator
        .apply_channel_command("UC1", &SignedCommand::new(at(13), set_ingestion(false), "owner-ok"))
        .await
        .unwrap();
    let before = h.stored_channel("UC1").await;

    for issued_at in [at(13), at(13) - Duration::seconds(1), at(3)] {
        let stale = SignedCommand::new(issued_at, set_ingestion(true), "owner-ok");
        assert!(matches!(
            h.coordinator.apply_channel_command("UC1", &stale).await,
            Err(SyncError::Validation(_))
        ));
    }

    assert_eq!(h.stored_channel("UC1").await, before);
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let h = Harness::new().await;
    let before = h.seed_channel(&user("u1"), "UC1", Some(2_500)).await;

    let forged = SignedCommand::new(at(13), ChannelAction::OptOut, "forged");
    assert!(matches!(
        h.coordinator.apply_channel_command("UC1", &forged).await,
        Err(SyncError::Validation(_))
    ));

    // An operator signature does not authorize an owner action.
    let wrong_party = SignedCommand::new(at(13), ChannelAction::OptOut, "operator-ok");
    assert!(h.coordinator.apply_channel_command("UC1", &wrong_party).await.is_err());

    h.verifier.reject_all();
    let rejected = SignedCommand::new(at(13), ChannelAction::Suspend, "operator-ok");
    assert!(h.coordinator.apply_channel_command("UC1", &rejected).await.is_err());

    assert_eq!(h.stored_channel("UC1").await, before);
}

#[tokio::test]
async fn test_suspended_channel_rejects_ingestion_toggle_regardless_of_time() {
    let h = Harness::new().await;
    h.seed_channel(&user("u1"), "UC1", Some(2_500)).await;

    let suspended = h
        .coordinator
        .apply_channel_command("UC1", &SignedCommand::new(at(13), ChannelAction::Suspend, "operator-ok"))
        .await
        .unwrap();
    assert_eq!(suspended.participation_status, ParticipationStatus::Suspended);
    assert!(!suspended.should_sync);

    for issued_at in [at(14), at(23)] {
        let toggle = SignedCommand::new(issued_at, set_ingestion(true), "owner-ok");
        assert!(matches!(
            h.coordinator.apply_channel_command("UC1", &toggle).await,
            Err(SyncError::Validation(_))
        ));
    }
    assert_eq!(h.stored_channel("UC1").await, suspended);
}

#[tokio::test]
async fn test_unsuspend_does_not_restore_ingestion() {
    let h = Harness::new().await;
    h.seed_channel(&user("u1"), "UC1", Some(2_500)).await;

    h.coordinator
        .apply_channel_command("UC1", &SignedCommand::new(at(13), ChannelAction::Suspend, "operator-ok"))
        .await
        .unwrap();
    let channel = h
        .coordinator
        .apply_channel_command("UC1", &SignedCommand::new(at(14), ChannelAction::Unsuspend, "operator-ok"))
        .await
        .unwrap();

    assert_eq!(channel.participation_status, ParticipationStatus::Unverified);
    assert!(!channel.should_sync);
    assert!(h.channels.find_ingestible().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_opted_out_channel_stays_out() {
    let h = Harness::new().await;
    h.seed_channel(&user("u1"), "UC1", Some(2_500)).await;

    let opted_out = h
        .coordinator
        .apply_channel_command("UC1", &SignedCommand::new(at(13), ChannelAction::OptOut, "owner-ok"))
        .await
        .unwrap();
    assert_eq!(opted_out.participation_status, ParticipationStatus::OptedOut);
    assert!(!opted_out.should_sync);

    for action in [ChannelAction::Unsuspend, ChannelAction::Verify, set_ingestion(true)] {
        let signature = match action.authority() {
            core_sync::CommandAuthority::Owner => "owner-ok",
            core_sync::CommandAuthority::Operator => "operator-ok",
        };
        let command = SignedCommand::new(at(14), action, signature);
        assert!(h.coordinator.apply_channel_command("UC1", &command).await.is_err());
    }
    assert_eq!(h.stored_channel("UC1").await, opted_out);
}

#[tokio::test]
async fn test_verify_and_unverify() {
    let h = Harness::new().await;
    h.seed_channel(&user("u1"), "UC1", Some(2_500)).await;

    let verified = h
        .coordinator
        .apply_channel_command("UC1", &SignedCommand::new(at(13), ChannelAction::Verify, "operator-ok"))
        .await
        .unwrap();
    assert_eq!(verified.participation_status, ParticipationStatus::Verified);
    assert!(verified.should_sync);

    let unverified = h
        .coordinator
        .apply_channel_command("UC1", &SignedCommand::new(at(14), ChannelAction::Unverify, "operator-ok"))
        .await
        .unwrap();
    assert_eq!(unverified.participation_status, ParticipationStatus::Unverified);
}

#[tokio::test]
async fn test_verifier_sees_canonical_message() {
    let h = Harness::new().await;
    h.seed_channel(&user("u1"), "UC1", Some(2_500)).await;

    let command = SignedCommand::new(at(13), ChannelAction::Suspend, "operator-ok");
    h.coordinator.apply_channel_command("UC1", &command).await.unwrap();

    let messages = h.verifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0], command.canonical_message("UC1").unwrap());
}

#[tokio::test]
async fn test_unknown_channel_is_not_found() {
    let h = Harness::new().await;
    let command = SignedCommand::new(at(13), ChannelAction::Suspend, "operator-ok");
    assert!(matches!(
        h.coordinator.apply_channel_command("UC-missing", &command).await,
        Err(SyncError::NotFound { .. })
    ));
}
