//! Conversation store tests
//!
//! Session lifecycle, history window and pause bookkeeping.

mod common;

use chat_appointment_scheduler::core::interpreter::Slots;
use chat_appointment_scheduler::core::services::SessionUpdate;
use chat_appointment_scheduler::core::traits::ConversationService;
use chat_appointment_scheduler::infrastructure::entities::{
    AppointmentType, ConversationState, MessageRole,
};
use chat_appointment_scheduler::infrastructure::settings::Settings;
use chrono::Duration;
use common::{Harness, RecordingCalendar};
use di::Ref;

const PHONE: &str = "5583988887777";

async fn harness() -> Harness {
    Harness::new(Ref::new(RecordingCalendar::default())).await
}

#[tokio::test]
async fn test_first_contact_creates_session_once() {
    let h = harness().await;

    let first = h.conversations.find_or_create_by_phone(PHONE).await.unwrap();
    assert_eq!(first.session.state, ConversationState::Intro);
    assert!(first.messages.is_empty());
    assert_eq!(first.session.context.0, Slots::default());

    let again = h.conversations.find_or_create_by_phone(PHONE).await.unwrap();
    assert_eq!(again.session.id, first.session.id);
}

#[tokio::test]
async fn test_update_session_applies_only_given_fields() {
    let h = harness().await;
    let session = h.conversations.find_or_create_by_phone(PHONE).await.unwrap().session;

    let context = Slots {
        client_name: Some("João".to_owned()),
        ..Slots::default()
    };
    h.conversations
        .update_session(
            session.id,
            SessionUpdate {
                state: Some(ConversationState::AskingAppointmentType),
                context: Some(context.clone()),
                client_name: Some("João".to_owned()),
                ..SessionUpdate::default()
            },
        )
        .await
        .unwrap();

    let updated = h
        .conversations
        .update_session(
            session.id,
            SessionUpdate {
                appointment_type: Some(AppointmentType::InStore),
                ..SessionUpdate::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.state, ConversationState::AskingAppointmentType);
    assert_eq!(updated.client_name.as_deref(), Some("João"));
    assert_eq!(updated.appointment_type, Some(AppointmentType::InStore));
    assert_eq!(updated.context.0, context);
}

#[tokio::test]
async fn test_update_missing_session_fails() {
    let h = harness().await;
    let result = h
        .conversations
        .update_session(uuid::Uuid::new_v4(), SessionUpdate::state(ConversationState::Intro))
        .await;
    assert!(matches!(result, Err(sqlx::Error::RowNotFound)));
}

#[tokio::test]
async fn test_history_is_windowed_oldest_first() {
    let settings = Settings {
        history_window: 3,
        ..Settings::defaults()
    };
    let h = Harness::with_settings(Ref::new(RecordingCalendar::default()), settings).await;
    let session = h.conversations.find_or_create_by_phone(PHONE).await.unwrap().session;

    for i in 0..5 {
        let role = if i % 2 == 0 { MessageRole::User } else { MessageRole::Bot };
        h.conversations
            .append_message(session.id, role, &format!("m{i}"))
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(1));
    }

    let history = h.conversations.find_or_create_by_phone(PHONE).await.unwrap();
    let contents: Vec<&str> = history.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m2", "m3", "m4"]);
}

#[tokio::test]
async fn test_clear_removes_session_and_history() {
    let h = harness().await;
    let session = h.conversations.find_or_create_by_phone(PHONE).await.unwrap().session;
    h.conversations
        .append_message(session.id, MessageRole::User, "oi")
        .await
        .unwrap();

    assert!(h.conversations.clear(PHONE).await.unwrap());
    assert!(!h.conversations.clear(PHONE).await.unwrap());

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversation_messages")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    let fresh = h.conversations.find_or_create_by_phone(PHONE).await.unwrap();
    assert_ne!(fresh.session.id, session.id);
    assert!(fresh.messages.is_empty());
}

#[tokio::test]
async fn test_pause_expires_lazily() {
    let h = harness().await;

    // pausing an unknown phone creates its session
    let until = h
        .conversations
        .pause(PHONE, Duration::hours(2), "MANUAL")
        .await
        .unwrap();
    assert_eq!(until, common::monday_morning() + Duration::hours(2));
    assert!(h.conversations.is_paused(PHONE).await.unwrap());
    assert_eq!(
        h.conversations.pause_remaining_minutes(PHONE).await.unwrap(),
        Some(120)
    );

    h.clock.advance(Duration::minutes(90) + Duration::seconds(1));
    // 29m59s left rounds up
    assert_eq!(
        h.conversations.pause_remaining_minutes(PHONE).await.unwrap(),
        Some(30)
    );

    h.clock.advance(Duration::minutes(30));
    assert!(!h.conversations.is_paused(PHONE).await.unwrap());

    let session = h.conversations.find_or_create_by_phone(PHONE).await.unwrap().session;
    assert!(session.paused_until.is_none());
    assert!(session.paused_by.is_none());
}

#[tokio::test]
async fn test_unpause_and_unknown_phone() {
    let h = harness().await;

    assert!(!h.conversations.is_paused("000").await.unwrap());
    assert_eq!(h.conversations.pause_remaining_minutes("000").await.unwrap(), None);

    h.conversations
        .pause(PHONE, Duration::minutes(10), "HUMAN_INTERVENTION")
        .await
        .unwrap();
    let session = h.conversations.find_or_create_by_phone(PHONE).await.unwrap().session;
    assert_eq!(session.paused_by.as_deref(), Some("HUMAN_INTERVENTION"));

    h.conversations.unpause(PHONE).await.unwrap();
    assert!(!h.conversations.is_paused(PHONE).await.unwrap());
}

#[tokio::test]
async fn test_out_of_range_pause_is_an_error() {
    let h = harness().await;

    let result = h
        .conversations
        .pause(PHONE, Duration::MAX, "MANUAL")
        .await;
    assert!(result.is_err());
    assert!(!h.conversations.is_paused(PHONE).await.unwrap());
}

#[tokio::test]
async fn test_session_save_keeps_pause() {
    let h = harness().await;
    let session = h.conversations.find_or_create_by_phone(PHONE).await.unwrap().session;

    h.conversations
        .pause(PHONE, Duration::hours(1), "MANUAL")
        .await
        .unwrap();

    // a turn that loaded the session before the pause writes its update afterwards
    h.conversations
        .update_session(session.id, SessionUpdate::state(ConversationState::AskingDate))
        .await
        .unwrap();

    assert!(h.conversations.is_paused(PHONE).await.unwrap());
}
